use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use shared::provider::{
    OAuthState, OAuthTokenSet, PkceChallenge, ProviderAccountInfo, ProviderAdapter, ProviderError,
    ProviderItem, ProviderPage,
};
use shared::{generate_pkce_verifier, pkce_challenge_for, DropboxProviderConfig, Provider, RateLimiter};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{
    AccountInfoResponse, ListFolderContinueRequest, ListFolderEntry, ListFolderRequest,
    ListFolderResponse, TokenResponse,
};

const AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
const ACCOUNT_URL: &str = "https://api.dropboxapi.com/2/users/get_current_account";
const LIST_FOLDER_URL: &str = "https://api.dropboxapi.com/2/files/list_folder";
const LIST_FOLDER_CONTINUE_URL: &str = "https://api.dropboxapi.com/2/files/list_folder/continue";

pub struct DropboxAdapter {
    client: Client,
    config: DropboxProviderConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl DropboxAdapter {
    pub fn new(config: DropboxProviderConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build dropbox http client");

        Self {
            client,
            config,
            rate_limiter,
        }
    }

    fn parse_entry(&self, entry: ListFolderEntry) -> ProviderItem {
        let is_folder = entry.tag == "folder";
        let extension = (!is_folder)
            .then(|| entry.name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
            .flatten();
        let path_display = entry.path_display.unwrap_or_else(|| format!("/{}", entry.name));
        let parent_folder = match path_display.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((dir, _)) => dir.to_string(),
            None => "/".to_string(),
        };

        ProviderItem {
            provider_file_id: entry.id,
            name: entry.name,
            extension: extension.clone(),
            size: entry.size.unwrap_or(0) as i64,
            mime_type: extension,
            parent_folder,
            is_folder,
            content_hash: entry.content_hash,
            created_time: None,
            modified_time: entry.client_modified.and_then(|t| {
                OffsetDateTime::parse(&t, &time::format_description::well_known::Rfc3339).ok()
            }),
            thumbnail_link: None,
            preview_link: None,
            web_view_link: None,
            web_content_link: None,
            link_expires_at: None,
            deleted: entry.tag == "deleted",
        }
    }
}

#[async_trait]
impl ProviderAdapter for DropboxAdapter {
    fn provider(&self) -> Provider {
        Provider::Dropbox
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
        let encoded_state = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(state_json);

        let scopes = self.config.oauth_scopes.join(" ");
        let url = format!(
            "{AUTH_URL}?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code\
             &scope={scope}&token_access_type=offline&prompt=consent\
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
            .post(ACCOUNT_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(body));
        }

        let info: AccountInfoResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(ProviderAccountInfo {
            provider_user_id: info.account_id,
            email: Some(info.email),
            name: Some(info.name.display_name),
            avatar_url: info.profile_photo_url,
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

    /// `page_token` doubles as Dropbox's own cursor here: unlike Drive, a
    /// fresh `cursor` is handed back on every page and is meant to be
    /// persisted as `sync_state.sync_page_token` for the account's next
    /// incremental run. A 401 is deliberately not retried in-process here —
    /// it propagates so the caller renews the token and lets the queue
    /// redeliver the job, unlike Drive's in-place retry on the same page.
    async fn list_changes(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
        _since: Option<OffsetDateTime>,
        page_token: Option<&str>,
    ) -> Result<ProviderPage, ProviderError> {
        let response = if let Some(cursor) = page_token {
            let body = ListFolderContinueRequest {
                cursor: cursor.to_string(),
            };
            self.rate_limiter
                .execute(|| async {
                    self.client
                        .post(LIST_FOLDER_CONTINUE_URL)
                        .bearer_auth(access_token)
                        .json(&body)
                        .send()
                        .await
                        .map_err(anyhow::Error::from)
                })
                .await
                .map_err(|e| ProviderError::ApiError(e.to_string()))?
        } else {
            let body = ListFolderRequest {
                path: String::new(),
                recursive: true,
            };
            self.rate_limiter
                .execute(|| async {
                    self.client
                        .post(LIST_FOLDER_URL)
                        .bearer_auth(access_token)
                        .json(&body)
                        .send()
                        .await
                        .map_err(anyhow::Error::from)
                })
                .await
                .map_err(|e| ProviderError::ApiError(e.to_string()))?
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::TokenExpired);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(body));
        }

        let parsed: ListFolderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let new_sync_page_token = (!parsed.has_more).then(|| parsed.cursor.clone());
        let next_page_token = parsed.has_more.then_some(parsed.cursor);

        Ok(ProviderPage {
            items: parsed.entries.into_iter().map(|e| self.parse_entry(e)).collect(),
            next_page_token,
            new_sync_page_token,
            renewed_token: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> DropboxAdapter {
        DropboxAdapter::new(
            DropboxProviderConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "https://example.com/callback".to_string(),
                oauth_scopes: vec!["files.metadata.read".to_string()],
            },
            Arc::new(RateLimiter::new(100, 3)),
        )
    }

    fn entry(tag: &str, name: &str, path_display: Option<&str>) -> ListFolderEntry {
        ListFolderEntry {
            tag: tag.to_string(),
            id: "id:abc".to_string(),
            name: name.to_string(),
            path_display: path_display.map(|s| s.to_string()),
            size: Some(2048),
            client_modified: Some("2024-06-01T00:00:00Z".to_string()),
            content_hash: Some("deadbeef".to_string()),
        }
    }

    #[test]
    fn folder_tag_is_recognized_as_a_folder_with_no_extension() {
        let item = adapter().parse_entry(entry("folder", "Projects", Some("/projects")));
        assert!(item.is_folder);
        assert_eq!(item.extension, None);
    }

    #[test]
    fn file_extension_is_derived_from_the_name_and_doubles_as_mime_type() {
        let item = adapter().parse_entry(entry("file", "report.pdf", Some("/docs/report.pdf")));
        assert!(!item.is_folder);
        assert_eq!(item.extension.as_deref(), Some("pdf"));
        assert_eq!(item.mime_type.as_deref(), Some("pdf"));
    }

    #[test]
    fn deleted_tag_maps_to_deleted() {
        let item = adapter().parse_entry(entry("deleted", "old.txt", Some("/old.txt")));
        assert!(item.deleted);
    }

    #[test]
    fn parent_folder_is_derived_from_path_display() {
        let item = adapter().parse_entry(entry("file", "report.pdf", Some("/docs/nested/report.pdf")));
        assert_eq!(item.parent_folder, "/docs/nested");
    }

    #[test]
    fn file_at_root_has_root_parent_folder() {
        let item = adapter().parse_entry(entry("file", "report.pdf", Some("/report.pdf")));
        assert_eq!(item.parent_folder, "/");
    }

    #[test]
    fn missing_path_display_falls_back_to_a_root_relative_path() {
        let item = adapter().parse_entry(entry("file", "report.pdf", None));
        assert_eq!(item.parent_folder, "/");
    }
}
