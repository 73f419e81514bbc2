use serde::{Deserialize, Serialize};

use crate::page::Page;
use crate::policy::{EntityType, PolicyReq, PolicyTuple, SubjectKind};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorizeParams {
    pub subject_type: EntityType,
    pub subject_kind: SubjectKind,
    pub subject: String,
    pub permission: String,
    pub object_type: EntityType,
    pub object: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
}

/// `POST /policies` — also backs the gRPC `AddPolicy`/`AddPolicies` pair; a
/// single tuple is just a one-element `tuples` vec.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddPoliciesParams {
    pub tuples: Vec<PolicyTuple>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddPoliciesResponse {
    pub added: bool,
}

/// `PUT /policies` — also backs `DeletePolicy`/`DeletePolicies`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeletePoliciesParams {
    pub tuples: Vec<PolicyTuple>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeletePoliciesResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListObjectsParams {
    pub policy_req: PolicyReq,
    pub page: Page,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListObjectsResponse {
    pub policies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListSubjectsParams {
    pub policy_req: PolicyReq,
    pub page: Page,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListSubjectsResponse {
    pub policies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountParams {
    pub policy_req: PolicyReq,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountResponse {
    pub count: u64,
}
