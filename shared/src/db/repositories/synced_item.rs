use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::error::DatabaseError,
    models::{SyncedItem, SyncedItemInput},
    traits::Repository,
};

const SYNCED_ITEM_COLUMNS: &str = r#"
    item_id, account_id, provider_file_id, name, extension, size, mime_type,
    parent_folder, is_folder, content_hash, created_time, modified_time,
    thumbnail_link, preview_link, web_view_link, web_content_link, link_expires_at
"#;

pub struct SyncedItemRepository {
    pool: PgPool,
}

impl SyncedItemRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// `AddSyncedItems`: a strict upsert keyed on `(account_id, provider_file_id)`.
    /// An item already in the catalog keeps its `item_id` and has every other
    /// column overwritten with the provider's current view; a new
    /// `provider_file_id` gets a freshly generated `item_id`. One item at a
    /// time inside the caller's transaction, matching the page-sized batches
    /// a provider adapter hands over.
    pub async fn upsert(
        &self,
        account_id: Uuid,
        item: &SyncedItemInput,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<SyncedItem, DatabaseError> {
        let row = sqlx::query_as::<_, SyncedItem>(&format!(
            r#"
            INSERT INTO synced_items (
                item_id, account_id, provider_file_id, name, extension, size, mime_type,
                parent_folder, is_folder, content_hash, created_time, modified_time,
                thumbnail_link, preview_link, web_view_link, web_content_link, link_expires_at
            )
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (account_id, provider_file_id) DO UPDATE SET
                name = EXCLUDED.name,
                extension = EXCLUDED.extension,
                size = EXCLUDED.size,
                mime_type = EXCLUDED.mime_type,
                parent_folder = EXCLUDED.parent_folder,
                is_folder = EXCLUDED.is_folder,
                content_hash = EXCLUDED.content_hash,
                created_time = EXCLUDED.created_time,
                modified_time = EXCLUDED.modified_time,
                thumbnail_link = EXCLUDED.thumbnail_link,
                preview_link = EXCLUDED.preview_link,
                web_view_link = EXCLUDED.web_view_link,
                web_content_link = EXCLUDED.web_content_link,
                link_expires_at = EXCLUDED.link_expires_at
            RETURNING {SYNCED_ITEM_COLUMNS}
            "#
        ))
        .bind(account_id)
        .bind(&item.provider_file_id)
        .bind(&item.name)
        .bind(&item.extension)
        .bind(item.size)
        .bind(&item.mime_type)
        .bind(&item.parent_folder)
        .bind(item.is_folder)
        .bind(&item.content_hash)
        .bind(item.created_time)
        .bind(item.modified_time)
        .bind(&item.thumbnail_link)
        .bind(&item.preview_link)
        .bind(&item.web_view_link)
        .bind(&item.web_content_link)
        .bind(item.link_expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// `DeleteConflictingItems`: before this page's re-observed items are
    /// upserted, removes any *other* row in the account's catalog that now
    /// occupies the same `(parent_folder, name)` path under a different
    /// `provider_file_id` — the stale leftover of a move/rename/re-parent
    /// that would otherwise sit alongside the freshly upserted row and read
    /// as a duplicate. Scoped to the ids observed on this one page; it never
    /// touches rows for ids this page didn't mention, so a multi-page
    /// incremental sync can't prune items it simply hasn't reached yet.
    pub async fn delete_conflicting(
        &self,
        account_id: Uuid,
        parent_folders: &[String],
        names: &[String],
        provider_file_ids: &[String],
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            DELETE FROM synced_items si
            USING UNNEST($2::text[], $3::text[], $4::text[])
                AS incoming(parent_folder, name, provider_file_id)
            WHERE si.account_id = $1
              AND si.parent_folder = incoming.parent_folder
              AND si.name = incoming.name
              AND si.provider_file_id <> incoming.provider_file_id
            "#,
        )
        .bind(account_id)
        .bind(parent_folders)
        .bind(names)
        .bind(provider_file_ids)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn find_by_account(&self, account_id: Uuid) -> Result<Vec<SyncedItem>, DatabaseError> {
        let items = sqlx::query_as::<_, SyncedItem>(&format!(
            "SELECT {SYNCED_ITEM_COLUMNS} FROM synced_items WHERE account_id = $1 ORDER BY name"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }
}

#[async_trait]
impl Repository<SyncedItem, Uuid> for SyncedItemRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SyncedItem>, DatabaseError> {
        let item = sqlx::query_as::<_, SyncedItem>(&format!(
            "SELECT {SYNCED_ITEM_COLUMNS} FROM synced_items WHERE item_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<SyncedItem>, DatabaseError> {
        let items = sqlx::query_as::<_, SyncedItem>(&format!(
            "SELECT {SYNCED_ITEM_COLUMNS} FROM synced_items ORDER BY name LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn create(&self, _entity: SyncedItem) -> Result<SyncedItem, DatabaseError> {
        Err(DatabaseError::InvalidInput(
            "synced items are written only through upsert()".to_string(),
        ))
    }

    async fn update(&self, _id: Uuid, _entity: SyncedItem) -> Result<Option<SyncedItem>, DatabaseError> {
        Err(DatabaseError::InvalidInput(
            "synced items are written only through upsert()".to_string(),
        ))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM synced_items WHERE item_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
