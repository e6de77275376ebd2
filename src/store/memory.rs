use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DueCursor, StoreError, StoreResult, WillStore};
use crate::will::schedule::next_due_at;
use crate::will::{WalletAddress, WillId, WillRecord};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<WillId, WillRecord>,
    due_index: BTreeSet<DueCursor>,
}

impl Inner {
    fn unindex(&mut self, record: &WillRecord) {
        if let Some(due_at) = next_due_at(record) {
            self.due_index.remove(&DueCursor {
                due_at,
                id: record.id,
            });
        }
    }

    fn index(&mut self, record: &WillRecord) {
        if let Some(due_at) = next_due_at(record) {
            self.due_index.insert(DueCursor {
                due_at,
                id: record.id,
            });
        }
    }
}

/// Process-local store keeping a due-time index alongside the records.
#[derive(Debug, Default)]
pub struct InMemoryWillStore {
    inner: RwLock<Inner>,
}

impl InMemoryWillStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WillStore for InMemoryWillStore {
    async fn get(&self, id: WillId) -> StoreResult<Option<WillRecord>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn insert(&self, record: &WillRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        inner.index(record);
        inner.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn put_if_version(
        &self,
        record: &WillRecord,
        expected_version: u64,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.records.get(&record.id).cloned() else {
            return Ok(false);
        };
        if current.version != expected_version {
            return Ok(false);
        }

        inner.unindex(&current);
        inner.index(record);
        inner.records.insert(record.id, record.clone());
        Ok(true)
    }

    async fn delete_if_version(&self, id: WillId, expected_version: u64) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.records.get(&id).cloned() {
            Some(current) if current.version == expected_version => {
                inner.unindex(&current);
                inner.records.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_due_before(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> StoreResult<Vec<WillRecord>> {
        let inner = self.inner.read().await;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);

        Ok(inner
            .due_index
            .range((lower, Bound::Unbounded))
            .take_while(|cursor| cursor.due_at <= now)
            .take(limit)
            .filter_map(|cursor| inner.records.get(&cursor.id).cloned())
            .collect())
    }

    async fn list_by_owner(&self, owner: &WalletAddress) -> StoreResult<Vec<WillRecord>> {
        let inner = self.inner.read().await;
        let mut owned: Vec<WillRecord> = inner
            .records
            .values()
            .filter(|record| &record.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::will::{WillStatus, WillTerms};
    use chrono::{Duration, TimeZone};

    fn active_at(start: DateTime<Utc>) -> WillRecord {
        let owner = WalletAddress::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let mut record = WillRecord::new_draft(owner, WillTerms::default(), start);
        record.status = WillStatus::Active;
        record
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let store = InMemoryWillStore::new();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let record = active_at(start);
        store.insert(&record).await.unwrap();

        let mut next = record.clone();
        next.version = 1;
        assert!(store.put_if_version(&next, 0).await.unwrap());
        assert!(!store.put_if_version(&next, 0).await.unwrap());
        assert_eq!(store.get(record.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_due_listing_is_ordered_and_resumable() {
        let store = InMemoryWillStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records: Vec<WillRecord> = (0..5)
            .map(|i| active_at(base + Duration::days(i)))
            .collect();
        for record in records.iter().rev() {
            store.insert(record).await.unwrap();
        }

        let now = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        let first = store.list_due_before(now, None, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![records[0].id, records[1].id]
        );

        let cursor = DueCursor {
            due_at: next_due_at(&first[1]).unwrap(),
            id: first[1].id,
        };
        let rest = store.list_due_before(now, Some(cursor), 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, records[2].id);
    }

    #[tokio::test]
    async fn test_delete_honours_version() {
        let store = InMemoryWillStore::new();
        let record = active_at(Utc::now());
        store.insert(&record).await.unwrap();

        assert!(!store.delete_if_version(record.id, 7).await.unwrap());
        assert!(store.delete_if_version(record.id, 0).await.unwrap());
        assert!(store.is_empty().await);
        assert!(store
            .list_due_before(Utc::now() + Duration::days(400), None, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
