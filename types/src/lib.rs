//! Shared primitive types for the peerpool node pool.
//!
//! Everything here is plain data: identities, amounts, timestamps, network
//! identifiers, and key material. All pool crates depend on these types;
//! none of them depend on any pool crate.

pub mod amount;
pub mod error;
pub mod id;
pub mod keys;
pub mod network;
pub mod time;

pub use amount::Amount;
pub use error::TypeError;
pub use id::{Account, NodeId};
pub use keys::{PublicKey, Signature};
pub use network::NetworkId;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
