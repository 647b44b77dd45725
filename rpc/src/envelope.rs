//! Signed request envelope.
//!
//! Authenticated params objects carry three fields next to the method's
//! own: `id` (the caller's node id), `nonce`, and `sig`. The signature
//! covers `method:nonce:<canonical params>` where the canonical params
//! are the params object minus `sig`, serialized with sorted keys, so
//! any client can reproduce the exact bytes.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use peerpool_core::PoolError;
use peerpool_store::Store;
use peerpool_types::{NodeId, Signature};

#[derive(Deserialize)]
struct AuthFields {
    id: String,
    nonce: u64,
    sig: String,
}

/// Verify an authenticated request and burn its nonce.
///
/// Order matters: the signature is checked before the nonce is consumed,
/// so a forged request cannot invalidate a legitimate caller's nonce.
pub fn verify_envelope(
    store: &Arc<dyn Store>,
    method: &str,
    params: &Value,
) -> Result<NodeId, PoolError> {
    let auth: AuthFields = serde_json::from_value(params.clone())
        .map_err(|e| PoolError::InvalidRequest(format!("missing auth fields: {e}")))?;

    let node_id = NodeId::new(&auth.id);
    let public_key = node_id
        .public_key()
        .map_err(|e| PoolError::BadSignature(format!("caller id is not a public key: {e}")))?;
    let verifying_key = VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| PoolError::BadSignature("caller id is not a valid key".to_string()))?;
    let sig: Signature = auth
        .sig
        .parse()
        .map_err(|e| PoolError::BadSignature(format!("unparsable signature: {e}")))?;

    let message = signing_payload(method, auth.nonce, params)?;
    verifying_key
        .verify(&message, &ed25519_dalek::Signature::from_bytes(sig.as_bytes()))
        .map_err(|_| PoolError::BadSignature("signature does not verify".to_string()))?;

    store.check_and_save_nonce(&node_id, auth.nonce)?;
    Ok(node_id)
}

/// The byte string a caller signs.
pub fn signing_payload(method: &str, nonce: u64, params: &Value) -> Result<Vec<u8>, PoolError> {
    let mut object = params
        .as_object()
        .cloned()
        .ok_or_else(|| PoolError::InvalidRequest("params must be an object".to_string()))?;
    object.remove("sig");
    // serde_json maps iterate sorted by key, so this serialization is
    // canonical.
    let canonical = serde_json::to_string(&Value::Object(object))
        .map_err(|e| PoolError::InvalidRequest(format!("unencodable params: {e}")))?;
    Ok(format!("{method}:{nonce}:{canonical}").into_bytes())
}

/// Sign a request's params the way [`verify_envelope`] expects.
///
/// `params` must already contain the `id` and `nonce` fields. Used by
/// pool agents and the test suite.
pub fn sign_request(
    method: &str,
    nonce: u64,
    params: &Value,
    key: &SigningKey,
) -> Result<Signature, PoolError> {
    let message = signing_payload(method, nonce, params)?;
    Ok(Signature(key.sign(&message).to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerpool_store_memory::MemoryStore;
    use peerpool_types::PublicKey;

    fn keypair(seed: u8) -> (SigningKey, NodeId) {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let id = NodeId::from_public_key(&PublicKey(key.verifying_key().to_bytes()));
        (key, id)
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    fn signed_params(method: &str, nonce: u64, key: &SigningKey, id: &NodeId) -> Value {
        let mut params = serde_json::json!({
            "id": id.to_string(),
            "nonce": nonce,
            "kind": "geth",
        });
        let sig = sign_request(method, nonce, &params, key).expect("sign");
        params["sig"] = Value::String(sig.to_hex());
        params
    }

    #[test]
    fn valid_envelope_verifies_and_burns_nonce() {
        let store = store();
        let (key, id) = keypair(1);
        let params = signed_params("vipnode_host", 1, &key, &id);

        let caller = verify_envelope(&store, "vipnode_host", &params).expect("verify");
        assert_eq!(caller, id);

        // Replaying the exact same request trips the nonce check.
        let err = verify_envelope(&store, "vipnode_host", &params).expect_err("replay");
        assert!(matches!(err, PoolError::StaleNonce { .. }));
    }

    #[test]
    fn tampered_params_fail_verification() {
        let store = store();
        let (key, id) = keypair(1);
        let mut params = signed_params("vipnode_host", 1, &key, &id);
        params["kind"] = Value::String("parity".to_string());

        let err = verify_envelope(&store, "vipnode_host", &params).expect_err("tampered");
        assert!(matches!(err, PoolError::BadSignature(_)));
    }

    #[test]
    fn signature_is_bound_to_the_method() {
        let store = store();
        let (key, id) = keypair(1);
        let params = signed_params("vipnode_host", 1, &key, &id);
        let err = verify_envelope(&store, "vipnode_disconnect", &params).expect_err("method swap");
        assert!(matches!(err, PoolError::BadSignature(_)));
    }

    #[test]
    fn someone_elses_signature_is_rejected() {
        let store = store();
        let (key, _) = keypair(1);
        let (_, other_id) = keypair(2);
        // Signed with key 1 but claiming identity 2.
        let mut params = serde_json::json!({
            "id": other_id.to_string(),
            "nonce": 1,
        });
        let sig = sign_request("vipnode_host", 1, &params, &key).expect("sign");
        params["sig"] = Value::String(sig.to_hex());

        let err = verify_envelope(&store, "vipnode_host", &params).expect_err("stolen id");
        assert!(matches!(err, PoolError::BadSignature(_)));
    }

    #[test]
    fn short_node_ids_cannot_authenticate() {
        let store = store();
        let params = serde_json::json!({
            "id": "not-a-key",
            "nonce": 1,
            "sig": "00",
        });
        let err = verify_envelope(&store, "vipnode_host", &params).expect_err("bad id");
        assert!(matches!(err, PoolError::BadSignature(_)));
    }

    #[test]
    fn failed_signature_does_not_burn_the_nonce() {
        let store = store();
        let (key, id) = keypair(1);
        let mut params = signed_params("vipnode_host", 5, &key, &id);
        params["kind"] = Value::String("tampered".to_string());
        verify_envelope(&store, "vipnode_host", &params).expect_err("tampered");

        // The legitimate request with the same nonce still goes through.
        let good = signed_params("vipnode_host", 5, &key, &id);
        verify_envelope(&store, "vipnode_host", &good).expect("nonce untouched");
    }
}
