use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{Domain, DomainPatch, DomainStatus};
use crate::page::Page;
use crate::policy::Relation;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateDomainParams {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: DomainStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateDomainResponse {
    pub domain: Domain,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateDomainParams {
    pub id: String,
    pub patch: DomainPatch,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateDomainResponse {
    pub domain: Domain,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeDomainStatusParams {
    pub id: String,
    pub status: DomainStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeDomainStatusResponse {
    pub domain: Domain,
}

/// Shared by `AssignUsers`/`UnassignUsers` (§4.5.7); `relation` selects which
/// permission each listed user receives/loses on the domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignUsersParams {
    pub domain_id: String,
    pub user_ids: Vec<String>,
    pub relation: Relation,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignUsersResponse {
    pub assigned: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnassignUsersParams {
    pub domain_id: String,
    pub user_ids: Vec<String>,
    pub relation: Relation,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnassignUsersResponse {
    pub unassigned: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListDomainsParams {
    pub page: Page,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListDomainsResponse {
    pub domains: Vec<Domain>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_cursor: Option<String>,
}

/// `ListUserDomains` — listing another user's domains requires the caller be
/// a platform admin (§4.5.8).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListUserDomainsParams {
    pub user_id: String,
    pub page: Page,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListUserDomainsResponse {
    pub domains: Vec<Domain>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_cursor: Option<String>,
}
