use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;

use crate::models::Provider;

/// RFC 7636 S256 PKCE: a 32-byte random verifier, base64url-encoded, shared
/// by every provider adapter so the challenge derivation never drifts
/// between them.
pub fn generate_pkce_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn pkce_challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("oauth callback carried no authorization code")]
    MissingCode,

    #[error("oauth callback carried no state parameter")]
    MissingState,

    #[error("oauth state failed CSRF validation")]
    InvalidState,

    #[error("no PKCE verifier found for this session")]
    MissingVerifier,

    #[error("http request to provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned an error response: {0}")]
    ApiError(String),

    #[error("provider response could not be parsed: {0}")]
    Decode(String),

    #[error("provider access token expired and could not be renewed")]
    TokenExpired,
}

/// Everything an adapter needs to build a consent-page URL: the
/// caller-supplied PKCE verifier and CSRF token, generated fresh per
/// authorization attempt and round-tripped through the session cookie.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub csrf_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub user_id: String,
    pub csrf_token: String,
}

#[derive(Debug, Clone)]
pub struct OAuthTokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expiry: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ProviderAccountInfo {
    pub provider_user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// One file/folder observation from a provider's change or listing API,
/// normalized to the catalog's shape before it ever reaches a repository.
#[derive(Debug, Clone)]
pub struct ProviderItem {
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
    pub deleted: bool,
}

/// One page of a sync listing. `next_page_token` is `None` once the
/// provider has no further pages; `new_page_token` is the cursor to persist
/// for the account's next incremental sync (always `None` for Google,
/// which instead hands back a fresh start page token every run).
/// `renewed_token` is populated when the adapter had to renew credentials
/// in-process to fetch this page (Google's 401 path); the caller must
/// persist it before the next page is requested, since the adapter itself
/// has no storage access.
#[derive(Debug, Clone)]
pub struct ProviderPage {
    pub items: Vec<ProviderItem>,
    pub next_page_token: Option<String>,
    pub new_sync_page_token: Option<String>,
    pub renewed_token: Option<OAuthTokenSet>,
}

/// The seam between the sync engine and a concrete provider (Google Drive,
/// Dropbox): OAuth handshake plus incremental change listing. Implementors
/// own their own HTTP client, rate limiting, and wire formats; the sync
/// engine only ever sees this trait.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Builds the consent-page redirect URL. Returns the URL plus the PKCE
    /// verifier and CSRF token the caller must stash in the signed session
    /// cookie until the callback arrives.
    fn authorization_url(&self, user_id: &str) -> (String, PkceChallenge);

    /// Exchanges an authorization code (+ PKCE verifier) for a token set.
    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<OAuthTokenSet, ProviderError>;

    /// Fetches the provider's identity for the account the token belongs to.
    async fn fetch_account_info(&self, access_token: &str) -> Result<ProviderAccountInfo, ProviderError>;

    /// Exchanges a refresh token for a fresh access token. Returns `None`
    /// for `refresh_token` when the provider doesn't rotate it.
    async fn renew_token(&self, refresh_token: &str) -> Result<OAuthTokenSet, ProviderError>;

    /// Lists one page of changes. `since` is the account's `last_synced_at`
    /// (`None` on a first-ever run); adapters that filter by modification
    /// time (Drive) use it to build an incremental query, while adapters
    /// that track a provider-native cursor (Dropbox) ignore it in favor of
    /// `page_token`. `page_token` is the current within-run pagination
    /// token, seeded from `sync_state.sync_page_token` for adapters that
    /// persist a cross-run cursor. `refresh_token` is handed down so an
    /// adapter that retries a 401 in-process (Google) can renew credentials
    /// without a round trip through the queue; adapters that instead
    /// surface `ProviderError::TokenExpired` for the caller to handle
    /// (Dropbox) ignore it.
    async fn list_changes(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        since: Option<OffsetDateTime>,
        page_token: Option<&str>,
    ) -> Result<ProviderPage, ProviderError>;
}
