use chrono::Utc;
use iotauth_policy::{qualify, PolicyEngineClient};
use iotauth_types::domain::DomainStatus;
use iotauth_types::domain::Domain;
use iotauth_types::error::ErrorKind;
use iotauth_types::methods::domain::{
    AssignUsersParams, AssignUsersResponse, ChangeDomainStatusParams, ChangeDomainStatusResponse,
    CreateDomainParams, CreateDomainResponse, ListDomainsParams, ListDomainsResponse,
    ListUserDomainsParams, ListUserDomainsResponse, UnassignUsersParams, UnassignUsersResponse,
    UpdateDomainParams, UpdateDomainResponse,
};
use iotauth_types::policy::{permission_for_relation, EntityType, Permission, PolicyCopy, PolicyReq, PolicyTuple, Relation, SubjectKind};
use iotauth_types::subject;
use iotauth_types::token::Token;
use ulid::Ulid;

use crate::error::{from_policy_check, from_policy_write};

use super::token::effective_subject;
use super::AuthService;

const DEFAULT_LIMIT: u32 = 100;

fn parse_domain_id(id: &str) -> Result<Ulid, ErrorKind> {
    id.parse()
        .map_err(|_| ErrorKind::MalformedEntity(format!("`{id}` is not a valid domain id")))
}

impl<C: PolicyEngineClient> AuthService<C> {
    /// §4.5.6. Phase 1 (engine write + policy-copy row) precedes Phase 2
    /// (domain row); a Phase-1 copy-row failure rolls back the engine write,
    /// a Phase-2 failure rolls back both.
    #[tracing::instrument(skip(self, caller, params))]
    pub async fn create_domain(
        &self,
        caller: &Token,
        params: CreateDomainParams,
    ) -> Result<CreateDomainResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        if matches!(params.status, DomainStatus::All) {
            return Err(ErrorKind::MalformedEntity(
                "status must be enabled or disabled".into(),
            ));
        }

        let domain = Domain::new(
            params.name,
            params.alias,
            params.tags,
            params.metadata,
            params.status,
            principal.user_id.clone(),
            Utc::now(),
        );
        let domain_id = domain.id.to_string();

        let tuples = vec![
            PolicyTuple {
                subject_type: EntityType::User,
                subject: principal.user_id.clone(),
                subject_relation: None,
                relation: Relation::Administrator,
                object_type: EntityType::Domain,
                object: domain_id.clone(),
            },
            PolicyTuple {
                subject_type: EntityType::Platform,
                subject: self.ctx.config.platform_id.clone(),
                subject_relation: None,
                relation: Relation::Platform,
                object_type: EntityType::Domain,
                object: domain_id.clone(),
            },
        ];

        self.ctx
            .policy_agent
            .add_policies(tuples.clone())
            .await
            .map_err(from_policy_write)?;

        let copy_row = PolicyCopy::new(
            EntityType::User,
            principal.user_id.clone(),
            Relation::Administrator,
            EntityType::Domain,
            domain_id.clone(),
        );
        if let Err(copy_err) = self.ctx.repos.policy_copy.save(&copy_row).await {
            return Err(self.rollback_policies(copy_err, tuples).await);
        }

        match self.ctx.repos.domain.save(&domain).await {
            Ok(()) => Ok(CreateDomainResponse { domain }),
            Err(save_err) => Err(self.rollback_domain_creation(tuples, &copy_row, save_err).await),
        }
    }

    async fn rollback_policies(&self, original: ErrorKind, tuples: Vec<PolicyTuple>) -> ErrorKind {
        match self.ctx.policy_agent.delete_policies(tuples).await {
            Ok(()) => original,
            Err(rollback_err) => ErrorKind::RollbackFailure {
                original: Box::new(original),
                rollback: Box::new(from_policy_write(rollback_err)),
            },
        }
    }

    async fn rollback_domain_creation(
        &self,
        tuples: Vec<PolicyTuple>,
        copy_row: &PolicyCopy,
        original: ErrorKind,
    ) -> ErrorKind {
        let policy_result = self.ctx.policy_agent.delete_policies(tuples).await;
        let copy_result = self.ctx.repos.policy_copy.delete(copy_row).await;
        match (policy_result, copy_result) {
            (Ok(()), Ok(())) => original,
            (Err(e), _) => ErrorKind::RollbackFailure {
                original: Box::new(original),
                rollback: Box::new(from_policy_write(e)),
            },
            (_, Err(e)) => ErrorKind::RollbackFailure {
                original: Box::new(original),
                rollback: Box::new(e),
            },
        }
    }

    /// §9: `UpdateDomain` is gated on Edit, deliberately distinct from
    /// `ChangeDomainStatus`'s Admin gate — not unified.
    #[tracing::instrument(skip(self, caller, params))]
    pub async fn update_domain(
        &self,
        caller: &Token,
        params: UpdateDomainParams,
    ) -> Result<UpdateDomainResponse, ErrorKind> {
        let domain_id = parse_domain_id(&params.id)?;
        let principal = self.authenticate_access(caller).await?;
        self.require_domain_permission(&principal, Permission::Edit, &params.id)
            .await?;
        let domain = self
            .ctx
            .repos
            .domain
            .update(domain_id, &principal.user_id, &params.patch)
            .await?;
        Ok(UpdateDomainResponse { domain })
    }

    #[tracing::instrument(skip(self, caller, params))]
    pub async fn change_domain_status(
        &self,
        caller: &Token,
        params: ChangeDomainStatusParams,
    ) -> Result<ChangeDomainStatusResponse, ErrorKind> {
        let domain_id = parse_domain_id(&params.id)?;
        let principal = self.authenticate_access(caller).await?;
        self.require_domain_permission(&principal, Permission::Admin, &params.id)
            .await?;
        let domain = self
            .ctx
            .repos
            .domain
            .change_status(domain_id, &principal.user_id, params.status)
            .await?;
        Ok(ChangeDomainStatusResponse { domain })
    }

    async fn require_domain_permission(
        &self,
        principal: &super::Principal,
        permission: Permission,
        domain_id: &str,
    ) -> Result<(), ErrorKind> {
        let subject = effective_subject(principal);
        let req = PolicyReq {
            subject_type: EntityType::User,
            subject_kind: SubjectKind::Id,
            subject: qualify(EntityType::User, &subject),
            permission: permission.to_string(),
            object_type: EntityType::Domain,
            object: domain_id.to_string(),
        };
        let allowed = self
            .ctx
            .policy_agent
            .check_policy(&req)
            .await
            .map_err(from_policy_check)?;
        if allowed {
            Ok(())
        } else {
            Err(ErrorKind::AuthorizationError)
        }
    }

    /// §4.5.8. Platform admins see every domain; everyone else is scoped to
    /// their own membership via the policy-copy journal's `subject_id` filter.
    #[tracing::instrument(skip(self, caller, params))]
    pub async fn list_domains(
        &self,
        caller: &Token,
        params: ListDomainsParams,
    ) -> Result<ListDomainsResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        let is_admin = self.is_platform_admin(&principal.user_id).await?;

        let mut page = params.page;
        page.subject_id = if is_admin {
            None
        } else {
            Some(principal.user_id.clone())
        };
        if page.limit == 0 {
            page.limit = DEFAULT_LIMIT;
        }

        let result = self.ctx.repos.domain.list(&page).await?;
        let mut domains = result.items;
        for domain in &mut domains {
            domain.permission = self
                .resolve_domain_permission(&principal, &domain.id.to_string())
                .await?;
        }
        Ok(ListDomainsResponse {
            domains,
            next_cursor: result.next_cursor,
        })
    }

    /// §4.5.8. Viewing another user's domain list additionally requires the
    /// caller to be a platform admin.
    #[tracing::instrument(skip(self, caller, params))]
    pub async fn list_user_domains(
        &self,
        caller: &Token,
        params: ListUserDomainsParams,
    ) -> Result<ListUserDomainsResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        if params.user_id != principal.user_id
            && !self.is_platform_admin(&principal.user_id).await?
        {
            return Err(ErrorKind::AuthorizationError);
        }

        let mut page = params.page;
        page.subject_id = Some(params.user_id);
        if page.limit == 0 {
            page.limit = DEFAULT_LIMIT;
        }

        let result = self.ctx.repos.domain.list(&page).await?;
        let mut domains = result.items;
        for domain in &mut domains {
            domain.permission = self
                .resolve_domain_permission(&principal, &domain.id.to_string())
                .await?;
        }
        Ok(ListUserDomainsResponse {
            domains,
            next_cursor: result.next_cursor,
        })
    }

    /// §4.5.7. Gated on `Share` plus the permission the target relation
    /// maps to; each target user must already hold platform membership.
    #[tracing::instrument(skip(self, caller, params))]
    pub async fn assign_users(
        &self,
        caller: &Token,
        params: AssignUsersParams,
    ) -> Result<AssignUsersResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        self.require_domain_permission(&principal, Permission::Share, &params.domain_id)
            .await?;
        self.require_domain_relation_permission(&principal, params.relation, &params.domain_id)
            .await?;

        let mut assigned = Vec::with_capacity(params.user_ids.len());
        for user_id in &params.user_ids {
            self.require_platform_membership(user_id).await?;
            let composite = subject::encode(&params.domain_id, user_id);
            self.add_domain_policy(&composite, params.relation, &params.domain_id)
                .await?;
            assigned.push(user_id.clone());
        }
        Ok(AssignUsersResponse { assigned })
    }

    #[tracing::instrument(skip(self, caller, params))]
    pub async fn unassign_users(
        &self,
        caller: &Token,
        params: UnassignUsersParams,
    ) -> Result<UnassignUsersResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        self.require_domain_permission(&principal, Permission::Share, &params.domain_id)
            .await?;
        self.require_domain_relation_permission(&principal, params.relation, &params.domain_id)
            .await?;

        let mut unassigned = Vec::with_capacity(params.user_ids.len());
        for user_id in &params.user_ids {
            self.require_platform_membership(user_id).await?;
            let composite = subject::encode(&params.domain_id, user_id);
            self.remove_domain_policy(&composite, params.relation, &params.domain_id)
                .await?;
            unassigned.push(user_id.clone());
        }
        Ok(UnassignUsersResponse { unassigned })
    }

    async fn require_domain_relation_permission(
        &self,
        principal: &super::Principal,
        relation: Relation,
        domain_id: &str,
    ) -> Result<(), ErrorKind> {
        let subject = effective_subject(principal);
        let req = PolicyReq {
            subject_type: EntityType::User,
            subject_kind: SubjectKind::Id,
            subject: qualify(EntityType::User, &subject),
            permission: permission_for_relation(relation),
            object_type: EntityType::Domain,
            object: domain_id.to_string(),
        };
        let allowed = self
            .ctx
            .policy_agent
            .check_policy(&req)
            .await
            .map_err(from_policy_check)?;
        if allowed {
            Ok(())
        } else {
            Err(ErrorKind::AuthorizationError)
        }
    }

    /// §3's derived `permission`: the strongest of Admin/Edit/View/Membership
    /// the caller holds on `domain_id`, checked in that order since the
    /// lattice in [`Permission::grants`] makes each subsequent check a
    /// superset of the relations accepted by the one before it. `Share` and
    /// `Platform` are gates on specific operations, not a reportable level,
    /// so they're excluded.
    async fn resolve_domain_permission(
        &self,
        principal: &super::Principal,
        domain_id: &str,
    ) -> Result<Option<String>, ErrorKind> {
        const CANDIDATES: [Permission; 4] = [
            Permission::Admin,
            Permission::Edit,
            Permission::View,
            Permission::Membership,
        ];
        let subject = qualify(EntityType::User, &effective_subject(principal));
        for permission in CANDIDATES {
            let req = PolicyReq {
                subject_type: EntityType::User,
                subject_kind: SubjectKind::Id,
                subject: subject.clone(),
                permission: permission.to_string(),
                object_type: EntityType::Domain,
                object: domain_id.to_string(),
            };
            let allowed = self
                .ctx
                .policy_agent
                .check_policy(&req)
                .await
                .map_err(from_policy_check)?;
            if allowed {
                return Ok(Some(permission.to_string()));
            }
        }
        Ok(None)
    }

    async fn require_platform_membership(&self, user_id: &str) -> Result<(), ErrorKind> {
        let req = PolicyReq {
            subject_type: EntityType::User,
            subject_kind: SubjectKind::Id,
            subject: qualify(EntityType::User, user_id),
            permission: Permission::Membership.to_string(),
            object_type: EntityType::Platform,
            object: self.ctx.config.platform_id.clone(),
        };
        let is_member = self
            .ctx
            .policy_agent
            .check_policy(&req)
            .await
            .map_err(from_policy_check)?;
        if is_member {
            Ok(())
        } else {
            Err(ErrorKind::MalformedEntity(format!(
                "user `{user_id}` is not a platform member"
            )))
        }
    }

    /// `AddPolicy` + `SavePolicyCopy`, rolling the tuple write back if the
    /// copy-journal write fails (§4.5.7).
    async fn add_domain_policy(
        &self,
        composite_subject: &str,
        relation: Relation,
        domain_id: &str,
    ) -> Result<(), ErrorKind> {
        let tuple = PolicyTuple {
            subject_type: EntityType::User,
            subject: composite_subject.to_string(),
            subject_relation: None,
            relation,
            object_type: EntityType::Domain,
            object: domain_id.to_string(),
        };
        self.ctx
            .policy_agent
            .add_policy(tuple.clone())
            .await
            .map_err(from_policy_write)?;

        let copy_row = PolicyCopy::new(
            EntityType::User,
            composite_subject.to_string(),
            relation,
            EntityType::Domain,
            domain_id.to_string(),
        );
        match self.ctx.repos.policy_copy.save(&copy_row).await {
            Ok(()) => Ok(()),
            Err(copy_err) => match self.ctx.policy_agent.delete_policy(tuple).await {
                Ok(()) => Err(copy_err),
                Err(rollback_err) => Err(ErrorKind::RollbackFailure {
                    original: Box::new(copy_err),
                    rollback: Box::new(from_policy_write(rollback_err)),
                }),
            },
        }
    }

    /// `DeletePolicy` + `DeletePolicyCopy`, re-inserting the tuple if the
    /// copy-journal delete fails (§4.5.7).
    async fn remove_domain_policy(
        &self,
        composite_subject: &str,
        relation: Relation,
        domain_id: &str,
    ) -> Result<(), ErrorKind> {
        let tuple = PolicyTuple {
            subject_type: EntityType::User,
            subject: composite_subject.to_string(),
            subject_relation: None,
            relation,
            object_type: EntityType::Domain,
            object: domain_id.to_string(),
        };
        self.ctx
            .policy_agent
            .delete_policy(tuple.clone())
            .await
            .map_err(from_policy_write)?;

        let copy_row = PolicyCopy::new(
            EntityType::User,
            composite_subject.to_string(),
            relation,
            EntityType::Domain,
            domain_id.to_string(),
        );
        match self.ctx.repos.policy_copy.delete(&copy_row).await {
            Ok(()) => Ok(()),
            Err(copy_err) => match self.ctx.policy_agent.add_policy(tuple).await {
                Ok(()) => Err(copy_err),
                Err(rollback_err) => Err(ErrorKind::RollbackFailure {
                    original: Box::new(copy_err),
                    rollback: Box::new(from_policy_write(rollback_err)),
                }),
            },
        }
    }

    #[tracing::instrument(skip(self, caller))]
    pub async fn retrieve_domain(&self, caller: &Token, id: &str) -> Result<Domain, ErrorKind> {
        let domain_id = parse_domain_id(id)?;
        let principal = self.authenticate_access(caller).await?;
        let mut domain = self.ctx.repos.domain.retrieve_by_id(domain_id).await?;
        domain.permission = self.resolve_domain_permission(&principal, id).await?;
        Ok(domain)
    }
}
