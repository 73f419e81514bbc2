use std::str::FromStr;

use iotauth_policy::proto;
use iotauth_policy::PolicyEngineClient;
use iotauth_types::error::ErrorKind;
use iotauth_types::key::KeyType;
use iotauth_types::methods::policy::{
    AddPoliciesParams, AuthorizeParams, CountParams, DeletePoliciesParams, ListObjectsParams,
    ListSubjectsParams,
};
use iotauth_types::methods::token::{IdentifyParams, IssueParams, RefreshParams};
use iotauth_types::page::Page;
use iotauth_types::policy::{EntityType, PolicyReq, PolicyTuple, Relation, SubjectKind};
use iotauth_types::token::Token;
use tonic::{Request, Response, Status};

use crate::system::AuthService;

/// Adapts the `tonic`-generated `AuthzService`/`AuthService` server traits
/// onto [`AuthService`], the same orchestrator the HTTP surface drives,
/// mirroring the teacher's one-struct-two-transports shape.
#[derive(Clone)]
pub struct GrpcAuthService<C: PolicyEngineClient> {
    inner: AuthService<C>,
}

impl<C: PolicyEngineClient> GrpcAuthService<C> {
    #[must_use]
    pub fn new(inner: AuthService<C>) -> Self {
        Self { inner }
    }
}

fn to_status(err: ErrorKind) -> Status {
    let message = err.to_string();
    match err {
        ErrorKind::AuthenticationError(_) => Status::unauthenticated(message),
        ErrorKind::AuthorizationError | ErrorKind::DomainAuthorization => {
            Status::permission_denied(message)
        }
        ErrorKind::MalformedEntity(_) | ErrorKind::InvalidPlatform => {
            Status::invalid_argument(message)
        }
        ErrorKind::NotFound(_) => Status::not_found(message),
        ErrorKind::Conflict(_) => Status::already_exists(message),
        ErrorKind::RollbackFailure { .. } => Status::internal(message),
    }
}

fn bearer_token<T>(request: &Request<T>) -> Option<Token> {
    request
        .metadata()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .and_then(|raw| Token::from_str(raw).ok())
}

fn require_bearer_token<T>(request: &Request<T>) -> Result<Token, Status> {
    bearer_token(request)
        .ok_or_else(|| Status::unauthenticated("missing Authorization: Bearer <token> metadata"))
}

fn key_type_from_i32(value: i32) -> Result<KeyType, Status> {
    match value {
        0 => Ok(KeyType::Access),
        1 => Ok(KeyType::Refresh),
        2 => Ok(KeyType::Recovery),
        3 => Ok(KeyType::Api),
        4 => Ok(KeyType::Invitation),
        other => Err(Status::invalid_argument(format!(
            "unknown key type ordinal `{other}`"
        ))),
    }
}

fn key_type_to_i32(key_type: KeyType) -> i32 {
    key_type as i32
}

fn entity_type_from_str(s: &str) -> Result<EntityType, Status> {
    EntityType::from_str(s)
        .map_err(|_| Status::invalid_argument(format!("unknown entity type `{s}`")))
}

fn subject_kind_from_str(s: &str) -> Result<SubjectKind, Status> {
    SubjectKind::from_str(s)
        .map_err(|_| Status::invalid_argument(format!("unknown subject kind `{s}`")))
}

fn relation_from_str(s: &str) -> Result<Relation, Status> {
    Relation::from_str(s).map_err(|_| Status::invalid_argument(format!("unknown relation `{s}`")))
}

fn req_from_proto(msg: proto::PolicyReqMessage) -> Result<PolicyReq, Status> {
    Ok(PolicyReq {
        subject_type: entity_type_from_str(&msg.subject_type)?,
        subject_kind: subject_kind_from_str(&msg.subject_kind)?,
        subject: msg.subject,
        permission: msg.permission,
        object_type: entity_type_from_str(&msg.object_type)?,
        object: msg.object,
    })
}

fn tuple_from_proto(msg: proto::PolicyTuple) -> Result<PolicyTuple, Status> {
    Ok(PolicyTuple {
        subject_type: entity_type_from_str(&msg.subject_type)?,
        subject: msg.subject,
        subject_relation: msg.subject_relation.as_deref().map(relation_from_str).transpose()?,
        relation: relation_from_str(&msg.relation)?,
        object_type: entity_type_from_str(&msg.object_type)?,
        object: msg.object,
    })
}

#[tonic::async_trait]
impl<C: PolicyEngineClient + 'static> proto::authz_service_server::AuthzService
    for GrpcAuthService<C>
{
    async fn authorize(
        &self,
        request: Request<proto::AuthorizeRequest>,
    ) -> Result<Response<proto::AuthorizeResponse>, Status> {
        let msg = request.into_inner();
        let params = AuthorizeParams {
            subject_type: entity_type_from_str(&msg.subject_type)?,
            subject_kind: subject_kind_from_str(&msg.subject_kind)?,
            subject: msg.subject,
            permission: msg.permission,
            object_type: entity_type_from_str(&msg.object_type)?,
            object: msg.object,
            relation: msg.relation,
        };
        let resp = self.inner.authorize(params).await.map_err(to_status)?;
        Ok(Response::new(proto::AuthorizeResponse {
            authorized: resp.authorized,
        }))
    }
}

#[tonic::async_trait]
impl<C: PolicyEngineClient + 'static> proto::auth_service_server::AuthService
    for GrpcAuthService<C>
{
    async fn issue(
        &self,
        request: Request<proto::IssueRequest>,
    ) -> Result<Response<proto::IssueResponse>, Status> {
        let caller = bearer_token(&request);
        let msg = request.into_inner();
        let params = IssueParams {
            user_id: msg.user_id,
            domain_id: msg.domain_id,
            r#type: key_type_from_i32(msg.r#type)?,
        };
        let resp = self
            .inner
            .issue(caller.as_ref(), params)
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::IssueResponse {
            access_token: resp.access_token.to_string(),
            refresh_token: resp.refresh_token.map(|t| t.to_string()),
            access_type: key_type_to_i32(resp.access_type),
        }))
    }

    async fn refresh(
        &self,
        request: Request<proto::RefreshRequest>,
    ) -> Result<Response<proto::RefreshResponse>, Status> {
        let msg = request.into_inner();
        let refresh_token = Token::from_str(&msg.refresh_token)
            .map_err(|_| Status::invalid_argument("malformed refresh token"))?;
        let params = RefreshParams {
            refresh_token,
            domain_id: msg.domain_id,
        };
        let resp = self.inner.refresh(params).await.map_err(to_status)?;
        Ok(Response::new(proto::RefreshResponse {
            access_token: resp.access_token.to_string(),
            refresh_token: resp.refresh_token.to_string(),
            access_type: key_type_to_i32(resp.access_type),
        }))
    }

    async fn identify(
        &self,
        request: Request<proto::IdentifyRequest>,
    ) -> Result<Response<proto::IdentifyResponse>, Status> {
        let msg = request.into_inner();
        let token = Token::from_str(&msg.token)
            .map_err(|_| Status::invalid_argument("malformed token"))?;
        let resp = self
            .inner
            .identify_params(IdentifyParams { token })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::IdentifyResponse {
            id: resp.id,
            user_id: resp.user_id,
            domain_id: resp.domain_id,
        }))
    }

    async fn revoke(
        &self,
        request: Request<proto::RevokeRequest>,
    ) -> Result<Response<proto::RevokeResponse>, Status> {
        let caller = require_bearer_token(&request)?;
        let msg = request.into_inner();
        let key_id = msg
            .token
            .parse()
            .map_err(|_| Status::invalid_argument("malformed key id"))?;
        let resp = self
            .inner
            .revoke(&caller, key_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::RevokeResponse { id: resp.id }))
    }

    async fn authorize(
        &self,
        request: Request<proto::AuthorizeRequest>,
    ) -> Result<Response<proto::AuthorizeResponse>, Status> {
        let msg = request.into_inner();
        let params = AuthorizeParams {
            subject_type: entity_type_from_str(&msg.subject_type)?,
            subject_kind: subject_kind_from_str(&msg.subject_kind)?,
            subject: msg.subject,
            permission: msg.permission,
            object_type: entity_type_from_str(&msg.object_type)?,
            object: msg.object,
            relation: msg.relation,
        };
        let resp = self.inner.authorize(params).await.map_err(to_status)?;
        Ok(Response::new(proto::AuthorizeResponse {
            authorized: resp.authorized,
        }))
    }

    async fn add_policy(
        &self,
        request: Request<proto::PolicyTuple>,
    ) -> Result<Response<proto::AddPoliciesResponse>, Status> {
        let tuple = tuple_from_proto(request.into_inner())?;
        let resp = self
            .inner
            .add_policies(AddPoliciesParams { tuples: vec![tuple] })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::AddPoliciesResponse { added: resp.added }))
    }

    async fn add_policies(
        &self,
        request: Request<proto::AddPoliciesRequest>,
    ) -> Result<Response<proto::AddPoliciesResponse>, Status> {
        let tuples = request
            .into_inner()
            .tuples
            .into_iter()
            .map(tuple_from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        let resp = self
            .inner
            .add_policies(AddPoliciesParams { tuples })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::AddPoliciesResponse { added: resp.added }))
    }

    async fn delete_policy(
        &self,
        request: Request<proto::PolicyTuple>,
    ) -> Result<Response<proto::DeletePoliciesResponse>, Status> {
        let tuple = tuple_from_proto(request.into_inner())?;
        let resp = self
            .inner
            .delete_policies(DeletePoliciesParams { tuples: vec![tuple] })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::DeletePoliciesResponse {
            deleted: resp.deleted,
        }))
    }

    async fn delete_policies(
        &self,
        request: Request<proto::DeletePoliciesRequest>,
    ) -> Result<Response<proto::DeletePoliciesResponse>, Status> {
        let tuples = request
            .into_inner()
            .tuples
            .into_iter()
            .map(tuple_from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        let resp = self
            .inner
            .delete_policies(DeletePoliciesParams { tuples })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::DeletePoliciesResponse {
            deleted: resp.deleted,
        }))
    }

    async fn list_objects(
        &self,
        request: Request<proto::ListObjectsRequest>,
    ) -> Result<Response<proto::ListObjectsResponse>, Status> {
        let msg = request.into_inner();
        let policy_req = req_from_proto(msg.policy_req.ok_or_else(|| {
            Status::invalid_argument("policy_req is required")
        })?)?;
        let resp = self
            .inner
            .list_objects(ListObjectsParams {
                policy_req,
                page: Page {
                    cursor: msg.cursor,
                    limit: msg.limit,
                    subject_id: None,
                    status: None,
                },
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::ListObjectsResponse {
            policies: resp.policies,
            next_page_token: resp.next_page_token,
        }))
    }

    async fn list_all_objects(
        &self,
        request: Request<proto::ListObjectsRequest>,
    ) -> Result<Response<proto::ListObjectsResponse>, Status> {
        let msg = request.into_inner();
        let policy_req = req_from_proto(msg.policy_req.ok_or_else(|| {
            Status::invalid_argument("policy_req is required")
        })?)?;
        let policies = self
            .inner
            .list_all_objects(ListObjectsParams {
                policy_req,
                page: Page::first(msg.limit.max(1)),
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::ListObjectsResponse {
            policies,
            next_page_token: None,
        }))
    }

    async fn list_subjects(
        &self,
        request: Request<proto::ListObjectsRequest>,
    ) -> Result<Response<proto::ListObjectsResponse>, Status> {
        let msg = request.into_inner();
        let policy_req = req_from_proto(msg.policy_req.ok_or_else(|| {
            Status::invalid_argument("policy_req is required")
        })?)?;
        let resp = self
            .inner
            .list_subjects(ListSubjectsParams {
                policy_req,
                page: Page {
                    cursor: msg.cursor,
                    limit: msg.limit,
                    subject_id: None,
                    status: None,
                },
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::ListObjectsResponse {
            policies: resp.policies,
            next_page_token: resp.next_page_token,
        }))
    }

    async fn list_all_subjects(
        &self,
        request: Request<proto::ListObjectsRequest>,
    ) -> Result<Response<proto::ListObjectsResponse>, Status> {
        let msg = request.into_inner();
        let policy_req = req_from_proto(msg.policy_req.ok_or_else(|| {
            Status::invalid_argument("policy_req is required")
        })?)?;
        let policies = self
            .inner
            .list_all_subjects(ListSubjectsParams {
                policy_req,
                page: Page::first(msg.limit.max(1)),
            })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::ListObjectsResponse {
            policies,
            next_page_token: None,
        }))
    }

    async fn count_objects(
        &self,
        request: Request<proto::PolicyReqMessage>,
    ) -> Result<Response<proto::CountResponse>, Status> {
        let policy_req = req_from_proto(request.into_inner())?;
        let resp = self
            .inner
            .count_objects(CountParams { policy_req })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::CountResponse { count: resp.count }))
    }

    async fn count_subjects(
        &self,
        request: Request<proto::PolicyReqMessage>,
    ) -> Result<Response<proto::CountResponse>, Status> {
        let policy_req = req_from_proto(request.into_inner())?;
        let resp = self
            .inner
            .count_subjects(CountParams { policy_req })
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::CountResponse { count: resp.count }))
    }
}
