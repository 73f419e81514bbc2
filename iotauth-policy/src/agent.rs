use std::sync::Arc;

use iotauth_types::page::{Page, PageResult};
use iotauth_types::policy::{EntityType, PolicyReq, PolicyTuple, Relation, SubjectKind};

use crate::client::PolicyEngineClient;
use crate::error::PolicyError;

/// `type:id` wire form expected on both sides of a [`PolicyReq`] (§3 Policy
/// Tuple). Exposed so `iotauth-server`'s orchestrator builds the same
/// qualified subject/object strings the agent and fake engine compare
/// against.
#[must_use]
pub fn qualify(entity_type: EntityType, id: &str) -> String {
    format!("{entity_type}:{id}")
}

/// Translates `PolicyReq`s into relation-tuple operations on the external
/// engine, enforcing the §4.4 preconditions atomically with each write.
/// Generic over [`PolicyEngineClient`] so tests can inject
/// [`crate::fake::FakePolicyEngine`] in place of [`crate::client::GrpcPolicyEngineClient`].
pub struct PolicyAgent<C> {
    client: Arc<C>,
}

impl<C: PolicyEngineClient> PolicyAgent<C> {
    #[must_use]
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_policy(&self, req: &PolicyReq) -> Result<bool, PolicyError> {
        self.client.check(req).await
    }

    async fn has_any_relation(
        &self,
        subject_type: EntityType,
        subject: &str,
        object_type: EntityType,
        object: &str,
    ) -> Result<bool, PolicyError> {
        for relation in [
            Relation::Administrator,
            Relation::Editor,
            Relation::Viewer,
            Relation::Member,
            Relation::Domain,
            Relation::ParentGroup,
            Relation::RoleGroup,
            Relation::Group,
            Relation::Platform,
        ] {
            let req = PolicyReq {
                subject_type,
                subject_kind: SubjectKind::Id,
                subject: qualify(subject_type, subject),
                permission: relation.to_string(),
                object_type,
                object: object.to_string(),
            };
            if self.client.check(&req).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn has_relation(
        &self,
        subject_type: EntityType,
        subject: &str,
        relation: Relation,
        object_type: EntityType,
        object: &str,
    ) -> Result<bool, PolicyError> {
        let req = PolicyReq {
            subject_type,
            subject_kind: SubjectKind::Id,
            subject: qualify(subject_type, subject),
            permission: relation.to_string(),
            object_type,
            object: object.to_string(),
        };
        self.client.check(&req).await
    }

    /// Whether *some* subject of `subject_type` holds `relation` to `object` —
    /// used where the precondition asks "does any group already claim this
    /// object" rather than checking one specific candidate subject.
    async fn has_any_subject_with_relation(
        &self,
        subject_type: EntityType,
        relation: Relation,
        object_type: EntityType,
        object: &str,
    ) -> Result<bool, PolicyError> {
        let req = PolicyReq {
            subject_type,
            subject_kind: SubjectKind::Id,
            subject: String::new(),
            permission: relation.to_string(),
            object_type,
            object: object.to_string(),
        };
        let page = self.client.list_subjects(&req, &Page::first(1)).await?;
        Ok(!page.items.is_empty())
    }

    /// Whether `subject` holds `relation` to *some* object of `object_type` —
    /// used where the precondition asks "does this group already have a
    /// parent at all" rather than checking one specific candidate parent.
    async fn has_any_object_with_relation(
        &self,
        subject_type: EntityType,
        subject: &str,
        relation: Relation,
        object_type: EntityType,
    ) -> Result<bool, PolicyError> {
        let req = PolicyReq {
            subject_type,
            subject_kind: SubjectKind::Id,
            subject: qualify(subject_type, subject),
            permission: relation.to_string(),
            object_type,
            object: String::new(),
        };
        let page = self.client.list_objects(&req, &Page::first(1)).await?;
        Ok(!page.items.is_empty())
    }

    /// Precondition 1 (§4.4): the user must have *any* relation to the
    /// domain; the group must already carry a Domain relation to it when
    /// `group_is_new` is false, and must carry none when it is true.
    #[tracing::instrument(skip(self))]
    pub async fn assign_user_to_group(
        &self,
        user: &str,
        domain: &str,
        group: &str,
        group_is_new: bool,
    ) -> Result<(), PolicyError> {
        if !self
            .has_any_relation(EntityType::User, user, EntityType::Domain, domain)
            .await?
        {
            return Err(PolicyError::Precondition(format!(
                "user {user} has no relation to domain {domain}"
            )));
        }
        let group_has_domain = self
            .has_relation(EntityType::Group, group, Relation::Domain, EntityType::Domain, domain)
            .await?;
        if group_is_new == group_has_domain {
            return Err(PolicyError::Precondition(format!(
                "group {group} domain-relation state does not match group_is_new={group_is_new}"
            )));
        }
        self.client
            .write(&[PolicyTuple {
                subject_type: EntityType::User,
                subject: user.to_string(),
                subject_relation: None,
                relation: Relation::Member,
                object_type: EntityType::Group,
                object: group.to_string(),
            }])
            .await
    }

    /// Precondition 2 (§4.4): same shape as `assign_user_to_group`, substituting Thing.
    #[tracing::instrument(skip(self))]
    pub async fn assign_user_to_thing(
        &self,
        user: &str,
        domain: &str,
        thing: &str,
        thing_is_new: bool,
    ) -> Result<(), PolicyError> {
        if !self
            .has_any_relation(EntityType::User, user, EntityType::Domain, domain)
            .await?
        {
            return Err(PolicyError::Precondition(format!(
                "user {user} has no relation to domain {domain}"
            )));
        }
        let thing_has_domain = self
            .has_relation(EntityType::Thing, thing, Relation::Domain, EntityType::Domain, domain)
            .await?;
        if thing_is_new == thing_has_domain {
            return Err(PolicyError::Precondition(format!(
                "thing {thing} domain-relation state does not match thing_is_new={thing_is_new}"
            )));
        }
        self.client
            .write(&[PolicyTuple {
                subject_type: EntityType::User,
                subject: user.to_string(),
                subject_relation: None,
                relation: Relation::Member,
                object_type: EntityType::Thing,
                object: thing.to_string(),
            }])
            .await
    }

    /// Precondition 3 (§4.4): both groups must share a domain; the child must
    /// not already have a parent, and must/must-not carry a Domain relation
    /// depending on whether it is new.
    #[tracing::instrument(skip(self))]
    pub async fn assign_group_to_group(
        &self,
        child: &str,
        parent: &str,
        domain: &str,
        child_is_new: bool,
    ) -> Result<(), PolicyError> {
        let parent_in_domain = self
            .has_relation(EntityType::Group, parent, Relation::Domain, EntityType::Domain, domain)
            .await?;
        if !parent_in_domain {
            return Err(PolicyError::Precondition(format!(
                "parent group {parent} does not belong to domain {domain}"
            )));
        }
        let child_has_parent = self
            .has_any_object_with_relation(EntityType::Group, child, Relation::ParentGroup, EntityType::Group)
            .await?;
        if child_has_parent {
            return Err(PolicyError::Precondition(format!(
                "group {child} already has a parent"
            )));
        }
        let child_has_domain = self
            .has_relation(EntityType::Group, child, Relation::Domain, EntityType::Domain, domain)
            .await?;
        if child_is_new == child_has_domain {
            return Err(PolicyError::Precondition(format!(
                "group {child} domain-relation state does not match child_is_new={child_is_new}"
            )));
        }
        self.client
            .write(&[PolicyTuple {
                subject_type: EntityType::Group,
                subject: child.to_string(),
                subject_relation: None,
                relation: Relation::ParentGroup,
                object_type: EntityType::Group,
                object: parent.to_string(),
            }])
            .await
    }

    /// Precondition 4 (§4.4): subject kind must be a channel; channel and
    /// thing must share a domain; no group may already hold this channel as
    /// a parent.
    #[tracing::instrument(skip(self))]
    pub async fn assign_channel_to_thing(
        &self,
        channel: &str,
        thing: &str,
        domain: &str,
    ) -> Result<(), PolicyError> {
        let channel_in_domain = self
            .has_relation(EntityType::Group, channel, Relation::Domain, EntityType::Domain, domain)
            .await?;
        let thing_in_domain = self
            .has_relation(EntityType::Thing, thing, Relation::Domain, EntityType::Domain, domain)
            .await?;
        if !channel_in_domain || !thing_in_domain {
            return Err(PolicyError::Precondition(format!(
                "channel {channel} and thing {thing} do not share domain {domain}"
            )));
        }
        let channel_already_parent = self
            .has_any_subject_with_relation(EntityType::Group, Relation::ParentGroup, EntityType::Group, channel)
            .await?;
        if channel_already_parent {
            return Err(PolicyError::Precondition(format!(
                "channel {channel} is already a parent of some group"
            )));
        }
        self.client
            .write(&[PolicyTuple {
                subject_type: EntityType::Group,
                subject: channel.to_string(),
                subject_relation: None,
                relation: Relation::Group,
                object_type: EntityType::Thing,
                object: thing.to_string(),
            }])
            .await
    }

    /// Precondition 5 (§4.4): the object must not already belong to any domain.
    #[tracing::instrument(skip(self))]
    pub async fn attach_to_domain(
        &self,
        object_type: EntityType,
        object: &str,
        domain: &str,
    ) -> Result<(), PolicyError> {
        let already_attached = self
            .has_any_object_with_relation(object_type, object, Relation::Domain, EntityType::Domain)
            .await?;
        if already_attached {
            return Err(PolicyError::Precondition(format!(
                "{object_type} {object} already belongs to a domain"
            )));
        }
        self.client
            .write(&[PolicyTuple {
                subject_type: object_type,
                subject: object.to_string(),
                subject_relation: None,
                relation: Relation::Domain,
                object_type: EntityType::Domain,
                object: domain.to_string(),
            }])
            .await
    }

    /// Precondition-free write, for call sites (e.g. `CreateDomain`) that
    /// have already established their own invariants before reaching here.
    #[tracing::instrument(skip(self, tuples))]
    pub async fn add_policies(&self, tuples: Vec<PolicyTuple>) -> Result<(), PolicyError> {
        self.client.write(&tuples).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_policy(&self, tuple: PolicyTuple) -> Result<(), PolicyError> {
        self.client.write(&[tuple]).await
    }

    #[tracing::instrument(skip(self, tuples))]
    pub async fn delete_policies(&self, tuples: Vec<PolicyTuple>) -> Result<(), PolicyError> {
        self.client.delete(&tuples).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_policy(&self, tuple: PolicyTuple) -> Result<(), PolicyError> {
        self.client.delete(&[tuple]).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve_objects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError> {
        self.client.list_objects(req, page).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve_subjects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError> {
        self.client.list_subjects(req, page).await
    }

    /// Streamed drain of `RetrieveObjects`, stopping when the cursor is
    /// empty or a short page comes back (§9).
    #[tracing::instrument(skip(self))]
    pub async fn retrieve_all_objects(&self, req: &PolicyReq) -> Result<Vec<String>, PolicyError> {
        self.drain_objects(req).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve_all_objects_count(&self, req: &PolicyReq) -> Result<u64, PolicyError> {
        Ok(self.drain_objects(req).await?.len() as u64)
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve_all_subjects(&self, req: &PolicyReq) -> Result<Vec<String>, PolicyError> {
        self.drain_subjects(req).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve_all_subjects_count(&self, req: &PolicyReq) -> Result<u64, PolicyError> {
        Ok(self.drain_subjects(req).await?.len() as u64)
    }

    async fn drain_objects(&self, req: &PolicyReq) -> Result<Vec<String>, PolicyError> {
        const PAGE_LIMIT: u32 = 100;
        let mut out = vec![];
        let mut page = Page::first(PAGE_LIMIT);
        loop {
            let result = self.client.list_objects(req, &page).await?;
            let is_last = result.is_last_page(PAGE_LIMIT);
            out.extend(result.items);
            match result.next_cursor {
                Some(cursor) if !is_last => page.cursor = Some(cursor),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn drain_subjects(&self, req: &PolicyReq) -> Result<Vec<String>, PolicyError> {
        const PAGE_LIMIT: u32 = 100;
        let mut out = vec![];
        let mut page = Page::first(PAGE_LIMIT);
        loop {
            let result = self.client.list_subjects(req, &page).await?;
            let is_last = result.is_last_page(PAGE_LIMIT);
            out.extend(result.items);
            match result.next_cursor {
                Some(cursor) if !is_last => page.cursor = Some(cursor),
                _ => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakePolicyEngine;

    fn agent() -> PolicyAgent<FakePolicyEngine> {
        PolicyAgent::new(Arc::new(FakePolicyEngine::new()))
    }

    #[tokio::test]
    async fn assign_user_to_new_group_requires_user_domain_relation() {
        let agent = agent();
        let err = agent
            .assign_user_to_group("u1", "d1", "g1", true)
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Precondition(_)));
    }

    #[tokio::test]
    async fn assign_user_to_new_group_succeeds_once_user_is_domain_member() {
        let agent = agent();
        agent
            .add_policy(PolicyTuple {
                subject_type: EntityType::User,
                subject: "u1".into(),
                subject_relation: None,
                relation: Relation::Administrator,
                object_type: EntityType::Domain,
                object: "d1".into(),
            })
            .await
            .unwrap();

        agent
            .assign_user_to_group("u1", "d1", "g1", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attach_to_domain_rejects_already_attached_object() {
        let agent = agent();
        agent.attach_to_domain(EntityType::Group, "g1", "d1").await.unwrap();
        let err = agent
            .attach_to_domain(EntityType::Group, "g1", "d1")
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Precondition(_)));
    }
}
