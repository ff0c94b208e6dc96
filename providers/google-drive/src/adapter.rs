use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use shared::provider::{
    OAuthState, OAuthTokenSet, PkceChallenge, ProviderAccountInfo, ProviderAdapter, ProviderError,
    ProviderItem, ProviderPage,
};
use shared::{pkce_challenge_for, generate_pkce_verifier, GoogleProviderConfig, Provider, RateLimiter};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{DriveFile, FilesListResponse, TokenResponse, UserInfoResponse, DRIVE_FOLDER_MIME_TYPE};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_FIELDS: &str = "nextPageToken,files(id,name,size,mimeType,createdTime,modifiedTime,thumbnailLink,fullFileExtension,parents,webViewLink,webContentLink,iconLink,sha256Checksum)";

#[derive(Debug)]
struct Unauthorized;

impl std::fmt::Display for Unauthorized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unauthorized")
    }
}

impl std::error::Error for Unauthorized {}

enum FetchPageError {
    Unauthorized,
    Other(ProviderError),
}

pub struct GoogleDriveAdapter {
    client: Client,
    config: GoogleProviderConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl GoogleDriveAdapter {
    pub fn new(config: GoogleProviderConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build google drive http client");

        Self {
            client,
            config,
            rate_limiter,
        }
    }

    fn parse_file(&self, file: DriveFile) -> ProviderItem {
        let is_folder = file.mime_type == DRIVE_FOLDER_MIME_TYPE;
        let extension = (!is_folder).then_some(file.full_file_extension).flatten();
        let preview_link = if is_folder {
            format!("https://drive.google.com/folder/d/{}/preview", file.id)
        } else {
            format!("https://drive.google.com/file/d/{}/preview", file.id)
        };

        ProviderItem {
            provider_file_id: file.id,
            name: file.name,
            extension,
            size: file
                .size
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0),
            mime_type: Some(file.mime_type),
            parent_folder: file
                .parents
                .and_then(|p| p.into_iter().next())
                .unwrap_or_else(|| "/".to_string()),
            is_folder,
            content_hash: file.sha256_checksum,
            created_time: file.created_time.and_then(|t| OffsetDateTime::parse(&t, &time::format_description::well_known::Rfc3339).ok()),
            modified_time: file.modified_time.and_then(|t| OffsetDateTime::parse(&t, &time::format_description::well_known::Rfc3339).ok()),
            thumbnail_link: file.thumbnail_link,
            preview_link: Some(preview_link),
            web_view_link: file.web_view_link,
            web_content_link: file.web_content_link,
            link_expires_at: None,
            deleted: false,
        }
    }

    fn list_query(since: Option<OffsetDateTime>) -> Result<Option<String>, ProviderError> {
        since
            .map(|t| {
                Ok(format!(
                    "modifiedTime > '{}'",
                    t.format(&time::format_description::well_known::Rfc3339)
                        .map_err(|e| ProviderError::Decode(e.to_string()))?
                ))
            })
            .transpose()
    }

    /// One `files.list` page, rate-limited and retried on transient/429
    /// errors. A 401 is surfaced as `Unauthorized` rather than retried here:
    /// the caller decides whether to renew and try again.
    async fn fetch_page(
        &self,
        access_token: &str,
        query: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FilesListResponse, FetchPageError> {
        let access_token = access_token.to_string();
        let page_token = page_token.map(|s| s.to_string());
        let client = self.client.clone();
        let query = query.map(|s| s.to_string());

        let list_impl = || {
            let access_token = access_token.clone();
            let page_token = page_token.clone();
            let client = client.clone();
            let query = query.clone();
            async move {
                let mut params = vec![
                    ("pageSize", "1000".to_string()),
                    ("fields", DRIVE_FIELDS.to_string()),
                ];
                if let Some(q) = &query {
                    params.push(("q", q.clone()));
                }
                if let Some(token) = &page_token {
                    params.push(("pageToken", token.clone()));
                }

                let response = client
                    .get(DRIVE_FILES_URL)
                    .bearer_auth(&access_token)
                    .query(&params)
                    .send()
                    .await
                    .map_err(|e| shared::rate_limiter::RetryableError::Transient(e.into()))?;

                if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                    return Err(shared::rate_limiter::RetryableError::Permanent(anyhow::Error::new(Unauthorized)));
                }
                if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Err(shared::rate_limiter::RetryableError::RateLimited {
                        retry_after: Duration::from_secs(30),
                        message: "google drive rate limit".to_string(),
                    });
                }
                if !response.status().is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(shared::rate_limiter::RetryableError::Permanent(anyhow::anyhow!(body)));
                }

                response
                    .json::<FilesListResponse>()
                    .await
                    .map_err(|e| shared::rate_limiter::RetryableError::Transient(e.into()))
            }
        };

        self.rate_limiter.execute_with_retry(list_impl).await.map_err(|e| {
            if e.is::<Unauthorized>() {
                FetchPageError::Unauthorized
            } else {
                FetchPageError::Other(ProviderError::ApiError(e.to_string()))
            }
        })
    }
}

#[async_trait]
impl ProviderAdapter for GoogleDriveAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, user_id: &str) -> (String, PkceChallenge) {
        let verifier = generate_pkce_verifier();
        let code_challenge = pkce_challenge_for(&verifier);
        let csrf_token = Uuid::new_v4().to_string();

        let state = OAuthState {
            user_id: user_id.to_string(),
            csrf_token: csrf_token.clone(),
        };
        let state_json = serde_json::to_string(&state).expect("oauth state always serializes");
        let encoded_state =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(state_json);

        let scopes = self.config.oauth_scopes.join(" ");
        let url = format!(
            "{AUTH_URL}?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code\
             &scope={scope}&access_type=offline&prompt=consent\
             &code_challenge={challenge}&code_challenge_method=S256&state={state}",
            client_id = urlencoding::encode(&self.config.client_id),
            redirect_uri = urlencoding::encode(&self.config.redirect_uri),
            scope = urlencoding::encode(&scopes),
            challenge = code_challenge,
            state = encoded_state,
        );

        (
            url,
            PkceChallenge {
                verifier,
                csrf_token,
            },
        )
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<OAuthTokenSet, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", &self.config.redirect_uri),
            ("code_verifier", verifier),
        ];

        let response = self.client.post(TOKEN_URL).form(&params).send().await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(OAuthTokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type,
            expiry: OffsetDateTime::now_utc() + Duration::from_secs(token.expires_in.max(0) as u64),
        })
    }

    async fn fetch_account_info(&self, access_token: &str) -> Result<ProviderAccountInfo, ProviderError> {
        let response = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(body));
        }

        let info: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(ProviderAccountInfo {
            provider_user_id: info.id,
            email: info.email,
            name: info.name,
            avatar_url: info.picture,
        })
    }

    async fn renew_token(&self, refresh_token: &str) -> Result<OAuthTokenSet, ProviderError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];

        let response = self.client.post(TOKEN_URL).form(&params).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::TokenExpired);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(OAuthTokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type,
            expiry: OffsetDateTime::now_utc() + Duration::from_secs(token.expires_in.max(0) as u64),
        })
    }

    /// Google always does a full `files.list` pass rather than persisting an
    /// incremental cursor: `page_token` here is Drive's own within-run
    /// pagination token, not a cross-run sync cursor, and `new_sync_page_token`
    /// is always `None` so `sync_state.sync_page_token` stays empty. `since`
    /// (the account's `last_synced_at`) becomes a `modifiedTime >` filter on
    /// every run after the first. A 401 triggers an in-process token renewal
    /// and a retry of the same page, rather than bubbling the failure up to
    /// the queue — `renewed_token` carries the new credentials back to the
    /// caller, which owns persisting them.
    async fn list_changes(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        since: Option<OffsetDateTime>,
        page_token: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        let query = Self::list_query(since)?;

        let (parsed, renewed_token) = match self.fetch_page(access_token, query.as_deref(), page_token).await {
            Ok(parsed) => (parsed, None),
            Err(FetchPageError::Other(e)) => return Err(e),
            Err(FetchPageError::Unauthorized) => {
                let refresh_token = refresh_token.ok_or(ProviderError::TokenExpired)?;
                let renewed = self.renew_token(refresh_token).await?;
                let parsed = self
                    .fetch_page(&renewed.access_token, query.as_deref(), page_token)
                    .await
                    .map_err(|e| match e {
                        FetchPageError::Unauthorized => ProviderError::TokenExpired,
                        FetchPageError::Other(e) => e,
                    })?;
                (parsed, Some(renewed))
            }
        };

        Ok(ProviderPage {
            items: parsed.files.into_iter().map(|f| self.parse_file(f)).collect(),
            next_page_token: parsed.next_page_token,
            new_sync_page_token: None,
            renewed_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GoogleDriveAdapter {
        GoogleDriveAdapter::new(
            GoogleProviderConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "https://example.com/callback".to_string(),
                oauth_scopes: vec!["drive.readonly".to_string()],
            },
            Arc::new(RateLimiter::new(100, 3)),
        )
    }

    fn file(name: &str, mime_type: &str) -> DriveFile {
        DriveFile {
            id: "f1".to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: Some("1024".to_string()),
            full_file_extension: Some("pdf".to_string()),
            sha256_checksum: Some("abc123".to_string()),
            parents: Some(vec!["parent-folder-id".to_string()]),
            created_time: Some("2024-01-01T00:00:00Z".to_string()),
            modified_time: Some("2024-06-01T00:00:00Z".to_string()),
            thumbnail_link: None,
            icon_link: None,
            web_view_link: None,
            web_content_link: None,
        }
    }

    #[test]
    fn folder_mime_type_is_recognized_as_a_folder_with_no_extension() {
        let item = adapter().parse_file(file("Projects", DRIVE_FOLDER_MIME_TYPE));
        assert!(item.is_folder);
        assert_eq!(item.extension, None);
    }

    #[test]
    fn regular_file_extension_comes_from_the_full_file_extension_field() {
        let item = adapter().parse_file(file("report.final.pdf", "application/pdf"));
        assert!(!item.is_folder);
        assert_eq!(item.extension.as_deref(), Some("pdf"));
    }

    #[test]
    fn missing_full_file_extension_has_none() {
        let mut f = file("README", "text/plain");
        f.full_file_extension = None;
        let item = adapter().parse_file(f);
        assert_eq!(item.extension, None);
    }

    #[test]
    fn parent_folder_uses_the_first_listed_parent() {
        let mut f = file("notes.txt", "text/plain");
        f.parents = Some(vec!["first-parent".to_string(), "second-parent".to_string()]);
        let item = adapter().parse_file(f);
        assert_eq!(item.parent_folder, "first-parent");
    }

    #[test]
    fn missing_parents_falls_back_to_root() {
        let mut f = file("notes.txt", "text/plain");
        f.parents = None;
        let item = adapter().parse_file(f);
        assert_eq!(item.parent_folder, "/");
    }

    #[test]
    fn unparseable_size_falls_back_to_zero() {
        let mut f = file("notes.txt", "text/plain");
        f.size = Some("not-a-number".to_string());
        let item = adapter().parse_file(f);
        assert_eq!(item.size, 0);
    }

    #[test]
    fn content_hash_comes_from_sha256_checksum() {
        let item = adapter().parse_file(file("notes.txt", "text/plain"));
        assert_eq!(item.content_hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn preview_link_uses_the_file_route_for_regular_files() {
        let item = adapter().parse_file(file("notes.txt", "text/plain"));
        assert_eq!(
            item.preview_link.as_deref(),
            Some("https://drive.google.com/file/d/f1/preview")
        );
    }

    #[test]
    fn preview_link_uses_the_folder_route_for_folders() {
        let item = adapter().parse_file(file("Projects", DRIVE_FOLDER_MIME_TYPE));
        assert_eq!(
            item.preview_link.as_deref(),
            Some("https://drive.google.com/folder/d/f1/preview")
        );
    }

    #[test]
    fn google_drive_items_are_never_reported_as_deleted() {
        let item = adapter().parse_file(file("notes.txt", "text/plain"));
        assert!(!item.deleted);
    }
}
