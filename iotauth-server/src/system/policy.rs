use std::str::FromStr;

use iotauth_policy::{qualify, PolicyEngineClient};
use iotauth_types::error::ErrorKind;
use iotauth_types::methods::policy::{
    AddPoliciesParams, AddPoliciesResponse, AuthorizeParams, AuthorizeResponse, CountParams,
    CountResponse, DeletePoliciesParams, DeletePoliciesResponse, ListObjectsParams,
    ListObjectsResponse, ListSubjectsParams, ListSubjectsResponse,
};
use iotauth_types::page::Page;
use iotauth_types::policy::{EntityType, PolicyReq, SubjectKind};
use iotauth_types::token::Token;

use crate::error::{from_policy_check, from_policy_write};

use super::token::effective_subject;
use super::AuthService;

const DEFAULT_LIMIT: u32 = 100;

fn objects_requiring_subject(object_type: EntityType) -> bool {
    matches!(
        object_type,
        EntityType::Group | EntityType::Thing | EntityType::Domain
    )
}

impl<C: PolicyEngineClient> AuthService<C> {
    /// §4.5.4. `subjectKind=Token` resolves the caller through [`Identify`],
    /// `subjectKind=Id` takes `subject` as a bare entity id to be qualified
    /// the same way [`iotauth_policy::PolicyAgent`]'s precondition helpers
    /// qualify theirs.
    #[tracing::instrument(skip(self, params))]
    pub async fn authorize(&self, params: AuthorizeParams) -> Result<AuthorizeResponse, ErrorKind> {
        if matches!(params.object_type, EntityType::Platform)
            && params.object != self.ctx.config.platform_id
        {
            return Err(ErrorKind::InvalidPlatform);
        }

        let subject = match params.subject_kind {
            SubjectKind::Id => params.subject.clone(),
            SubjectKind::Token => {
                let token = Token::from_str(&params.subject)
                    .map_err(|_| ErrorKind::MalformedEntity("subject is not a token".into()))?;
                let principal = self.identify(&token).await?;
                if principal.subject.is_empty() && objects_requiring_subject(params.object_type) {
                    return Err(ErrorKind::DomainAuthorization);
                }
                effective_subject(&principal)
            }
        };

        let req = PolicyReq {
            subject_type: params.subject_type,
            subject_kind: SubjectKind::Id,
            subject: qualify(params.subject_type, &subject),
            permission: params.permission,
            object_type: params.object_type,
            object: params.object,
        };
        let authorized = self
            .ctx
            .policy_agent
            .check_policy(&req)
            .await
            .map_err(from_policy_check)?;
        Ok(AuthorizeResponse { authorized })
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn add_policies(
        &self,
        params: AddPoliciesParams,
    ) -> Result<AddPoliciesResponse, ErrorKind> {
        self.ctx
            .policy_agent
            .add_policies(params.tuples)
            .await
            .map_err(from_policy_write)?;
        Ok(AddPoliciesResponse { added: true })
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn delete_policies(
        &self,
        params: DeletePoliciesParams,
    ) -> Result<DeletePoliciesResponse, ErrorKind> {
        self.ctx
            .policy_agent
            .delete_policies(params.tuples)
            .await
            .map_err(from_policy_write)?;
        Ok(DeletePoliciesResponse { deleted: true })
    }

    /// §4.5.9. A default page limit of 100 applies when the caller leaves it
    /// unset or supplies zero.
    #[tracing::instrument(skip(self, params))]
    pub async fn list_objects(
        &self,
        mut params: ListObjectsParams,
    ) -> Result<ListObjectsResponse, ErrorKind> {
        if params.page.limit == 0 {
            params.page.limit = DEFAULT_LIMIT;
        }
        let result = self
            .ctx
            .policy_agent
            .retrieve_objects(&params.policy_req, &params.page)
            .await
            .map_err(from_policy_check)?;
        Ok(ListObjectsResponse {
            policies: result.items,
            next_page_token: result.next_cursor,
        })
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn list_all_objects(&self, params: ListObjectsParams) -> Result<Vec<String>, ErrorKind> {
        self.ctx
            .policy_agent
            .retrieve_all_objects(&params.policy_req)
            .await
            .map_err(from_policy_check)
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn list_subjects(
        &self,
        mut params: ListSubjectsParams,
    ) -> Result<ListSubjectsResponse, ErrorKind> {
        if params.page.limit == 0 {
            params.page.limit = DEFAULT_LIMIT;
        }
        let result = self
            .ctx
            .policy_agent
            .retrieve_subjects(&params.policy_req, &params.page)
            .await
            .map_err(from_policy_check)?;
        Ok(ListSubjectsResponse {
            policies: result.items,
            next_page_token: result.next_cursor,
        })
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn list_all_subjects(
        &self,
        params: ListSubjectsParams,
    ) -> Result<Vec<String>, ErrorKind> {
        self.ctx
            .policy_agent
            .retrieve_all_subjects(&params.policy_req)
            .await
            .map_err(from_policy_check)
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn count_objects(&self, params: CountParams) -> Result<CountResponse, ErrorKind> {
        let count = self
            .ctx
            .policy_agent
            .retrieve_all_objects_count(&params.policy_req)
            .await
            .map_err(from_policy_check)?;
        Ok(CountResponse { count })
    }

    #[tracing::instrument(skip(self, params))]
    pub async fn count_subjects(&self, params: CountParams) -> Result<CountResponse, ErrorKind> {
        let count = self
            .ctx
            .policy_agent
            .retrieve_all_subjects_count(&params.policy_req)
            .await
            .map_err(from_policy_check)?;
        Ok(CountResponse { count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use iotauth_policy::{FakePolicyEngine, PolicyAgent};
    use iotauth_types::policy::{Permission, PolicyTuple, Relation};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    async fn service() -> AuthService<FakePolicyEngine> {
        let pool = Arc::new(iotauth_storage::connect_tmp().await);
        crate::migrations::migrate(&pool).await.unwrap();
        let repos = crate::repos::Repos::new(pool);
        let config = Arc::new(crate::Config {
            log_level: "info".into(),
            secret_key: crate::SecretKey(b"test-secret".to_vec()),
            access_duration: std::time::Duration::from_secs(3600),
            refresh_duration: std::time::Duration::from_secs(86400),
            database_url: "sqlite::memory:".into(),
            policy_engine_addr: "127.0.0.1:0".into(),
            tracing_endpoint: None,
            trace_sample_ratio: None,
            instance_id: "test".into(),
            port: 0,
            issuer: "iotauth".into(),
            platform_id: "magistrala".into(),
        });
        let tokenizer = Arc::new(crate::tokenizer::Tokenizer::new(
            &config.secret_key.0,
            config.issuer.clone(),
        ));
        let policy_agent = Arc::new(PolicyAgent::new(Arc::new(FakePolicyEngine::new())));
        let (stop_tx, _) = broadcast::channel(1);
        AuthService::new(Context {
            config,
            repos,
            tokenizer,
            policy_agent,
            stop_tx,
        })
    }

    #[tokio::test]
    async fn authorize_rejects_non_singleton_platform_object() {
        let svc = service().await;
        let result = svc
            .authorize(AuthorizeParams {
                subject_type: EntityType::User,
                subject_kind: SubjectKind::Id,
                subject: "u1".into(),
                permission: Permission::Admin.to_string(),
                object_type: EntityType::Platform,
                object: "not-magistrala".into(),
                relation: None,
            })
            .await;
        assert!(matches!(result, Err(ErrorKind::InvalidPlatform)));
    }

    #[tokio::test]
    async fn authorize_with_empty_subject_falls_back_to_identified_user_on_platform() {
        let svc = service().await;
        svc.ctx
            .policy_agent
            .add_policy(PolicyTuple {
                subject_type: EntityType::User,
                subject: "u1".into(),
                subject_relation: None,
                relation: Relation::Administrator,
                object_type: EntityType::Platform,
                object: "magistrala".into(),
            })
            .await
            .unwrap();

        let issued = svc
            .issue(
                None,
                iotauth_types::methods::token::IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: iotauth_types::key::KeyType::Access,
                },
            )
            .await
            .unwrap();

        let resp = svc
            .authorize(AuthorizeParams {
                subject_type: EntityType::User,
                subject_kind: SubjectKind::Token,
                subject: issued.access_token.to_string(),
                permission: Permission::Admin.to_string(),
                object_type: EntityType::Platform,
                object: "magistrala".into(),
                relation: None,
            })
            .await
            .unwrap();
        assert!(resp.authorized);
    }

    #[tokio::test]
    async fn authorize_with_empty_subject_fails_on_scoped_object() {
        let svc = service().await;
        let issued = svc
            .issue(
                None,
                iotauth_types::methods::token::IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: iotauth_types::key::KeyType::Access,
                },
            )
            .await
            .unwrap();

        let result = svc
            .authorize(AuthorizeParams {
                subject_type: EntityType::User,
                subject_kind: SubjectKind::Token,
                subject: issued.access_token.to_string(),
                permission: Permission::View.to_string(),
                object_type: EntityType::Domain,
                object: "d1".into(),
                relation: None,
            })
            .await;
        assert!(matches!(result, Err(ErrorKind::DomainAuthorization)));
    }

    #[tokio::test]
    async fn list_objects_defaults_limit_to_one_hundred() {
        let svc = service().await;
        let resp = svc
            .list_objects(ListObjectsParams {
                policy_req: PolicyReq {
                    subject_type: EntityType::User,
                    subject_kind: SubjectKind::Id,
                    subject: "user:u1".into(),
                    permission: Permission::View.to_string(),
                    object_type: EntityType::Domain,
                    object: String::new(),
                },
                page: Page {
                    cursor: None,
                    limit: 0,
                    subject_id: None,
                    status: None,
                },
            })
            .await
            .unwrap();
        assert!(resp.policies.len() <= 100);
    }
}
