//! Sealed storage for the settlement operator credential.
//!
//! The operator's Ed25519 seed lives on disk sealed under a passphrase:
//! Argon2id stretches the passphrase into an AES-256-GCM key, and the
//! file records the exact work parameters it was sealed with, so
//! raising the defaults later never locks an existing keystore out.
//! The daemon reads the passphrase from [`KEYSTORE_PASSPHRASE_ENV`] at
//! startup; sealing happens once, in operator tooling.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::PoolError;

/// Environment variable holding the keystore passphrase.
pub const KEYSTORE_PASSPHRASE_ENV: &str = "POOL_KEYSTORE_PASSPHRASE";

/// Tag distinguishing pool operator keystores from any other JSON file
/// an operator might point the daemon at.
const FORMAT_TAG: &str = "peerpool/operator-key/v1";

const SALT_LEN: usize = 16;
/// AES-GCM nonce length (96 bits); the seal field starts with it.
const NONCE_LEN: usize = 12;
const SEED_LEN: usize = 32;

/// Argon2id work parameters, persisted next to the sealed seed.
///
/// Unsealing always uses the parameters from the file, never the
/// current defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub lanes: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        // Interactive-unlock grade: the daemon unseals exactly once.
        Self {
            memory_kib: 64 * 1024,
            time_cost: 3,
            lanes: 1,
        }
    }
}

impl KdfCost {
    fn params(&self) -> Result<Params, PoolError> {
        Params::new(self.memory_kib, self.time_cost, self.lanes, Some(SEED_LEN))
            .map_err(|e| PoolError::Keystore(format!("bad KDF parameters: {e}")))
    }
}

/// A sealed operator seed, as serialized to the keystore JSON file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorKeystore {
    /// Must equal the pool's format tag.
    pub format: String,
    pub kdf: KdfCost,
    /// Hex-encoded KDF salt.
    pub salt: String,
    /// Hex-encoded nonce followed by the AES-256-GCM ciphertext.
    pub seal: String,
}

impl OperatorKeystore {
    /// Seal a 32-byte operator seed under a passphrase at default cost.
    pub fn seal(seed: &[u8; SEED_LEN], passphrase: &str) -> Result<Self, PoolError> {
        Self::seal_with_cost(seed, passphrase, KdfCost::default())
    }

    /// Seal with explicit work parameters.
    pub fn seal_with_cost(
        seed: &[u8; SEED_LEN],
        passphrase: &str,
        cost: KdfCost,
    ) -> Result<Self, PoolError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let cipher = cipher_for(passphrase, &salt, cost)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.as_ref())
            .map_err(|e| PoolError::Keystore(format!("sealing failed: {e}")))?;

        let mut seal = nonce.to_vec();
        seal.extend_from_slice(&ciphertext);

        Ok(Self {
            format: FORMAT_TAG.to_string(),
            kdf: cost,
            salt: hex::encode(salt),
            seal: hex::encode(seal),
        })
    }

    /// Recover the operator seed.
    pub fn unseal(&self, passphrase: &str) -> Result<[u8; SEED_LEN], PoolError> {
        if self.format != FORMAT_TAG {
            return Err(PoolError::Keystore(format!(
                "not an operator keystore (format {:?}, expected {FORMAT_TAG:?})",
                self.format
            )));
        }
        let salt = decode_hex_field("salt", &self.salt)?;
        let sealed = decode_hex_field("seal", &self.seal)?;
        if sealed.len() <= NONCE_LEN {
            return Err(PoolError::Keystore("sealed payload too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = cipher_for(passphrase, &salt, self.kdf)?;
        let seed = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| {
            PoolError::Keystore("wrong passphrase or corrupted keystore".to_string())
        })?;

        <[u8; SEED_LEN]>::try_from(seed.as_slice()).map_err(|_| {
            PoolError::Keystore(format!(
                "sealed seed has {} bytes, expected {SEED_LEN}",
                seed.len()
            ))
        })
    }

    /// Write the keystore as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), PoolError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PoolError::Keystore(format!("keystore encoding failed: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| PoolError::Keystore(format!("failed to write keystore file: {e}")))
    }

    /// Read a keystore file.
    pub fn read(path: &Path) -> Result<Self, PoolError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| PoolError::Keystore(format!("failed to read keystore file: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| PoolError::Keystore(format!("invalid keystore JSON: {e}")))
    }
}

/// Stretch the passphrase into the sealing cipher at the given cost.
fn cipher_for(passphrase: &str, salt: &[u8], cost: KdfCost) -> Result<Aes256Gcm, PoolError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, cost.params()?);
    let mut key = [0u8; SEED_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| PoolError::Keystore(format!("key derivation failed: {e}")))?;
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| PoolError::Keystore(format!("cipher init failed: {e}")))
}

fn decode_hex_field(field: &str, value: &str) -> Result<Vec<u8>, PoolError> {
    hex::decode(value).map_err(|e| PoolError::Keystore(format!("invalid {field} hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal Argon2id cost so the suite stays fast.
    fn light() -> KdfCost {
        KdfCost {
            memory_kib: 8,
            time_cost: 1,
            lanes: 1,
        }
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let keystore =
            OperatorKeystore::seal_with_cost(&[42u8; 32], "open sesame", light()).expect("seal");
        assert_eq!(keystore.unseal("open sesame").expect("unseal"), [42u8; 32]);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let keystore =
            OperatorKeystore::seal_with_cost(&[42u8; 32], "correct", light()).expect("seal");
        assert!(keystore.unseal("wrong").is_err());
    }

    #[test]
    fn unsealing_uses_the_stored_cost() {
        // A file sealed at non-default cost must unseal without the
        // caller knowing which parameters were used.
        let keystore =
            OperatorKeystore::seal_with_cost(&[7u8; 32], "pp", light()).expect("seal");
        assert_ne!(keystore.kdf, KdfCost::default());
        keystore.unseal("pp").expect("stored parameters govern");
    }

    #[test]
    fn foreign_format_is_rejected() {
        let mut keystore =
            OperatorKeystore::seal_with_cost(&[0u8; 32], "pp", light()).expect("seal");
        keystore.format = "somebody-elses-wallet/v3".to_string();
        assert!(keystore.unseal("pp").is_err());
    }

    #[test]
    fn tampered_seal_fails() {
        let mut keystore =
            OperatorKeystore::seal_with_cost(&[9u8; 32], "pp", light()).expect("seal");
        // Flip the last ciphertext byte.
        let flipped = if keystore.seal.ends_with('0') { "1" } else { "0" };
        keystore.seal.truncate(keystore.seal.len() - 1);
        keystore.seal.push_str(flipped);
        assert!(keystore.unseal("pp").is_err());
    }

    #[test]
    fn truncated_seal_is_rejected() {
        let mut keystore =
            OperatorKeystore::seal_with_cost(&[9u8; 32], "pp", light()).expect("seal");
        keystore.seal = "00".repeat(NONCE_LEN);
        assert!(keystore.unseal("pp").is_err());
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("operator.json");
        let keystore =
            OperatorKeystore::seal_with_cost(&[99u8; 32], "file-test", light()).expect("seal");
        keystore.write(&path).expect("write");
        let loaded = OperatorKeystore::read(&path).expect("read");
        assert_eq!(loaded.unseal("file-test").expect("unseal"), [99u8; 32]);
    }

    #[test]
    fn read_missing_file_fails() {
        assert!(OperatorKeystore::read(Path::new("/nonexistent/operator.json")).is_err());
    }
}
