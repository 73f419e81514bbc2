use async_trait::async_trait;
use iotauth_types::page::{Page, PageResult};
use iotauth_types::policy::{PolicyReq, PolicyTuple};
use tonic::transport::Channel;

use crate::error::PolicyError;
use crate::proto;

/// The operations a policy agent needs from the external relation-tuple
/// engine. Kept narrow and trait-object-safe so tests can substitute
/// [`crate::fake::FakePolicyEngine`] for [`GrpcPolicyEngineClient`]
/// (grounded in `modkit-security::policy_engine`'s `PolicyEngine` trait /
/// `PolicyEngineRef = Arc<dyn PolicyEngine>` shape).
#[async_trait]
pub trait PolicyEngineClient: Send + Sync {
    async fn check(&self, req: &PolicyReq) -> Result<bool, PolicyError>;
    async fn write(&self, tuples: &[PolicyTuple]) -> Result<(), PolicyError>;
    async fn delete(&self, tuples: &[PolicyTuple]) -> Result<(), PolicyError>;
    async fn list_objects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError>;
    async fn list_subjects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError>;
}

/// `tonic`-backed implementation talking to the first-party `AuthzService`
/// / `AuthService` gRPC surface (§6).
#[derive(Clone)]
pub struct GrpcPolicyEngineClient {
    channel: Channel,
}

impl GrpcPolicyEngineClient {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    fn authz_client(&self) -> proto::authz_service_client::AuthzServiceClient<Channel> {
        proto::authz_service_client::AuthzServiceClient::new(self.channel.clone())
    }

    fn auth_client(&self) -> proto::auth_service_client::AuthServiceClient<Channel> {
        proto::auth_service_client::AuthServiceClient::new(self.channel.clone())
    }
}

fn to_proto_req(req: &PolicyReq) -> proto::PolicyReqMessage {
    proto::PolicyReqMessage {
        subject_type: req.subject_type.to_string(),
        subject_kind: req.subject_kind.to_string(),
        subject: req.subject.clone(),
        permission: req.permission.clone(),
        object_type: req.object_type.to_string(),
        object: req.object.clone(),
    }
}

fn to_proto_tuple(tuple: &PolicyTuple) -> proto::PolicyTuple {
    proto::PolicyTuple {
        subject_type: tuple.subject_type.to_string(),
        subject: tuple.subject.clone(),
        subject_relation: tuple.subject_relation.map(|r| r.to_string()),
        relation: tuple.relation.to_string(),
        object_type: tuple.object_type.to_string(),
        object: tuple.object.clone(),
    }
}

#[async_trait]
impl PolicyEngineClient for GrpcPolicyEngineClient {
    #[tracing::instrument(skip(self))]
    async fn check(&self, req: &PolicyReq) -> Result<bool, PolicyError> {
        let response = self
            .authz_client()
            .authorize(proto::AuthorizeRequest {
                subject_type: req.subject_type.to_string(),
                subject_kind: req.subject_kind.to_string(),
                subject: req.subject.clone(),
                permission: req.permission.clone(),
                object_type: req.object_type.to_string(),
                object: req.object.clone(),
                relation: None,
            })
            .await?
            .into_inner();
        Ok(response.authorized)
    }

    #[tracing::instrument(skip(self, tuples))]
    async fn write(&self, tuples: &[PolicyTuple]) -> Result<(), PolicyError> {
        let response = self
            .auth_client()
            .add_policies(proto::AddPoliciesRequest {
                tuples: tuples.iter().map(to_proto_tuple).collect(),
            })
            .await?
            .into_inner();
        if response.added {
            Ok(())
        } else {
            Err(PolicyError::Precondition(
                "policy engine declined the write".into(),
            ))
        }
    }

    #[tracing::instrument(skip(self, tuples))]
    async fn delete(&self, tuples: &[PolicyTuple]) -> Result<(), PolicyError> {
        let response = self
            .auth_client()
            .delete_policies(proto::DeletePoliciesRequest {
                tuples: tuples.iter().map(to_proto_tuple).collect(),
            })
            .await?
            .into_inner();
        if response.deleted {
            Ok(())
        } else {
            Err(PolicyError::Precondition(
                "policy engine declined the delete".into(),
            ))
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_objects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError> {
        let response = self
            .auth_client()
            .list_objects(proto::ListObjectsRequest {
                policy_req: Some(to_proto_req(req)),
                cursor: page.cursor.clone(),
                limit: page.limit,
            })
            .await?
            .into_inner();
        Ok(PageResult {
            items: response.policies,
            next_cursor: response.next_page_token,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn list_subjects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError> {
        let response = self
            .auth_client()
            .list_subjects(proto::ListObjectsRequest {
                policy_req: Some(to_proto_req(req)),
                cursor: page.cursor.clone(),
                limit: page.limit,
            })
            .await?
            .into_inner();
        Ok(PageResult {
            items: response.policies,
            next_cursor: response.next_page_token,
        })
    }
}
