use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct AccountInfoName {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountInfoResponse {
    pub account_id: String,
    pub email: String,
    pub name: AccountInfoName,
    pub profile_photo_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListFolderRequest {
    pub path: String,
    pub recursive: bool,
}

#[derive(Debug, Serialize)]
pub struct ListFolderContinueRequest {
    pub cursor: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFolderEntry {
    #[serde(rename = ".tag")]
    pub tag: String,
    pub id: String,
    pub name: String,
    pub path_display: Option<String>,
    pub size: Option<u64>,
    pub client_modified: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListFolderResponse {
    pub entries: Vec<ListFolderEntry>,
    pub cursor: String,
    pub has_more: bool,
}
