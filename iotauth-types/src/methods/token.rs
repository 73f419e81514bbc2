use serde::{Deserialize, Serialize};

use crate::key::KeyType;
use crate::token::Token;

/// Request for `Issue` (§6). `domain_id` is only meaningful for Access/API
/// keys; absent for Recovery/Invitation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssueParams {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain_id: Option<String>,
    pub r#type: KeyType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssueResponse {
    pub access_token: Token,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub refresh_token: Option<Token>,
    pub access_type: KeyType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshParams {
    pub refresh_token: Token,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access_token: Token,
    pub refresh_token: Token,
    pub access_type: KeyType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifyParams {
    pub token: Token,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifyResponse {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain_id: Option<String>,
}

/// `DELETE /keys/{id}` and the gRPC `Revoke` path share this response shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RevokeResponse {
    pub id: String,
}

/// `POST /keys` — caller mints an API key for themselves.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateApiKeyParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: String,
    pub access_token: Token,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrieveKeyResponse {
    pub id: String,
    pub r#type: KeyType,
    pub issuer: String,
    pub subject: String,
}
