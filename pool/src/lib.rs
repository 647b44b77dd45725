//! Coordination core of the peerpool node pool.
//!
//! The pool brokers connections between paying clients and
//! service-providing hosts of a peer network: clients ask for hosts,
//! hosts register availability, and both sides keep the pool informed
//! with keepalive updates. Corroborated peerings (attested by both
//! endpoints within the keepalive window) move credit from client to
//! host each interval; the settlement adapter turns accrued credit into
//! withdrawals against an external authority.
//!
//! All durable state lives behind the `peerpool-store` traits; the types
//! in this crate are stateless given a store handle and are shared
//! freely across RPC tasks.

pub mod balance;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod matchmaker;
pub mod payment;
pub mod requests;
pub mod settlement;
pub mod status;
pub mod welcome;

pub use balance::PayPerInterval;
pub use config::{ContractConfig, PoolConfig, StoreBackend};
pub use coordinator::Pool;
pub use error::PoolError;
pub use matchmaker::Matchmaker;
pub use payment::PaymentService;
pub use settlement::{ContractSettlement, HttpAuthority, OperatorCredential, SettlementAuthority};
pub use status::PoolStatus;
pub use welcome::WelcomeTemplate;
