//! Will record persistence.
//!
//! Every write is conditional on the version the writer last read, which is the
//! only coordination between concurrent engine calls.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::will::{WalletAddress, WillId, WillRecord};

pub use memory::InMemoryWillStore;
pub use postgres::PgWillStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("will {0} already exists")]
    Duplicate(WillId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt will record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Resume position for paging through due records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueCursor {
    pub due_at: DateTime<Utc>,
    pub id: WillId,
}

#[async_trait]
pub trait WillStore: Send + Sync {
    async fn get(&self, id: WillId) -> StoreResult<Option<WillRecord>>;

    async fn insert(&self, record: &WillRecord) -> StoreResult<()>;

    /// Replace the stored record only if its version is still `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn put_if_version(&self, record: &WillRecord, expected_version: u64)
        -> StoreResult<bool>;

    async fn delete_if_version(&self, id: WillId, expected_version: u64) -> StoreResult<bool>;

    /// Records whose next due instant is at or before `now`, ordered by
    /// `(due_at, id)` and strictly after `after` when given.
    async fn list_due_before(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> StoreResult<Vec<WillRecord>>;

    /// Newest first.
    async fn list_by_owner(&self, owner: &WalletAddress) -> StoreResult<Vec<WillRecord>>;

    async fn ping(&self) -> StoreResult<()>;
}
