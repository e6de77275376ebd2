//! Proof-of-life expiry and execution engine for smart wills.
//!
//! Owners check in periodically; missing the yearly deadline opens a 30 day
//! grace period, after which the will executes and funds are distributed to
//! beneficiaries. An emergency override secret executes immediately.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod executor;
pub mod identity;
pub mod notify;
pub mod store;
pub mod sweep;
pub mod telemetry;
pub mod will;

pub use engine::{EngineConfig, ProofOfLifeEngine};
pub use error::{EngineError, EngineResult, ValidationIssue};
pub use will::{WillId, WillRecord, WillStatus};
