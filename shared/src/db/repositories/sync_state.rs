use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db::error::DatabaseError, models::SyncState};

/// 1:1 with `accounts`, keyed by `account_id`.
pub struct SyncStateRepository {
    pool: PgPool,
}

impl SyncStateRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// `GetLatestSyncTimeAndPagetoken`. Both fields are `None` until the
    /// account's first successful sync.
    pub async fn get(&self, account_id: Uuid) -> Result<Option<SyncState>, DatabaseError> {
        let state = sqlx::query_as::<_, SyncState>(
            r#"
            SELECT account_id, last_synced_at, sync_page_token
            FROM sync_state
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    /// `UpdateLastSyncedTimestamp`. `sync_page_token` is written as given,
    /// including `None` for providers (Google) that re-derive a fresh
    /// token every page rather than persisting one across runs.
    pub async fn update_last_synced(
        &self,
        account_id: Uuid,
        last_synced_at: OffsetDateTime,
        sync_page_token: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_state
            SET last_synced_at = $2, sync_page_token = $3
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(last_synced_at)
        .bind(sync_page_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }

        Ok(())
    }
}
