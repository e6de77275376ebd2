use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use super::{DueCursor, StoreError, StoreResult, WillStore};
use crate::will::schedule::next_due_at;
use crate::will::{WalletAddress, WillId, WillRecord};

/// Postgres-backed store. The full record lives in a JSONB document; the columns
/// beside it exist for the version check and the due-time index.
#[derive(Clone)]
pub struct PgWillStore {
    pool: PgPool,
}

fn db_version(record_id: WillId, version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt {
        id: record_id.to_string(),
        reason: format!("version {version} out of range"),
    })
}

impl PgWillStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl WillStore for PgWillStore {
    async fn get(&self, id: WillId) -> StoreResult<Option<WillRecord>> {
        let row: Option<(Json<WillRecord>,)> =
            sqlx::query_as("SELECT document FROM wills WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(record),)| record))
    }

    async fn insert(&self, record: &WillRecord) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO wills (id, owner, status, version, next_due_at, created_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.0)
        .bind(record.owner.as_str())
        .bind(record.status.as_str())
        .bind(db_version(record.id, record.version)?)
        .bind(next_due_at(record))
        .bind(record.created_at)
        .bind(Json(record))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(record.id));
        }
        Ok(())
    }

    async fn put_if_version(
        &self,
        record: &WillRecord,
        expected_version: u64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE wills
            SET status = $2, version = $3, next_due_at = $4, document = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(record.id.0)
        .bind(record.status.as_str())
        .bind(db_version(record.id, record.version)?)
        .bind(next_due_at(record))
        .bind(Json(record))
        .bind(db_version(record.id, expected_version)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_if_version(&self, id: WillId, expected_version: u64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM wills WHERE id = $1 AND version = $2")
            .bind(id.0)
            .bind(db_version(id, expected_version)?)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_due_before(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> StoreResult<Vec<WillRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<(Json<WillRecord>,)> = match after {
            None => {
                sqlx::query_as(
                    r#"
                    SELECT document FROM wills
                    WHERE next_due_at IS NOT NULL AND next_due_at <= $1
                    ORDER BY next_due_at, id
                    LIMIT $2
                    "#,
                )
                .bind(now)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Some(cursor) => {
                sqlx::query_as(
                    r#"
                    SELECT document FROM wills
                    WHERE next_due_at IS NOT NULL AND next_due_at <= $1
                      AND (next_due_at, id) > ($3, $4)
                    ORDER BY next_due_at, id
                    LIMIT $2
                    "#,
                )
                .bind(now)
                .bind(limit)
                .bind(cursor.due_at)
                .bind(cursor.id.0)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|(Json(record),)| record).collect())
    }

    async fn list_by_owner(&self, owner: &WalletAddress) -> StoreResult<Vec<WillRecord>> {
        let rows: Vec<(Json<WillRecord>,)> = sqlx::query_as(
            "SELECT document FROM wills WHERE owner = $1 ORDER BY created_at DESC, id",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(Json(record),)| record).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
