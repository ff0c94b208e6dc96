use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::time::OffsetDateTime;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "provider_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Dropbox,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Google => write!(f, "google"),
            Provider::Dropbox => write!(f, "dropbox"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = UnsupportedProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "dropbox" => Ok(Provider::Dropbox),
            other => Err(UnsupportedProviderError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported provider: {0}")]
pub struct UnsupportedProviderError(pub String);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Retried,
    Finished,
    Failed,
}

/// Identity record created by an external webhook; CloudMesh only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub account_id: uuid::Uuid,
    pub user_id: String,
    pub provider: Provider,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// 1:1 with `Account`. `access_token`/`refresh_token` are always ciphertext-hex,
/// never plaintext, even in memory between `Decrypt` calls (callers zeroize promptly).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthToken {
    pub account_id: uuid::Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expiry: OffsetDateTime,
}

/// 1:1 with `Account`. `last_synced_at == None` means "never synced".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncState {
    pub account_id: uuid::Uuid,
    pub last_synced_at: Option<OffsetDateTime>,
    pub sync_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncedItem {
    pub item_id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub provider_file_id: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub mime_type: Option<String>,
    pub parent_folder: String,
    pub is_folder: bool,
    pub content_hash: Option<String>,
    pub created_time: Option<OffsetDateTime>,
    pub modified_time: Option<OffsetDateTime>,
    pub thumbnail_link: Option<String>,
    pub preview_link: Option<String>,
    pub web_view_link: Option<String>,
    pub web_content_link: Option<String>,
    pub link_expires_at: Option<OffsetDateTime>,
}

/// A batch-ready row, before the `item_id` is resolved by the upsert (existing
/// items keep their `item_id`; new ones get one generated by the store).
#[derive(Debug, Clone)]
pub struct SyncedItemInput {
    pub provider_file_id: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub mime_type: Option<String>,
    pub parent_folder: String,
    pub is_folder: bool,
    pub content_hash: Option<String>,
    pub created_time: Option<OffsetDateTime>,
    pub modified_time: Option<OffsetDateTime>,
    pub thumbnail_link: Option<String>,
    pub preview_link: Option<String>,
    pub web_view_link: Option<String>,
    pub web_content_link: Option<String>,
    pub link_expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobLog {
    pub job_id: String,
    pub account_id: uuid::Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub queue: String,
    pub params: JsonValue,
    pub retries: i32,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
}
