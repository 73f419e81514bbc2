use std::collections::HashSet;
use std::sync::Mutex;
use std::str::FromStr;

use async_trait::async_trait;
use iotauth_types::page::{Page, PageResult};
use iotauth_types::policy::{Permission, PolicyReq, PolicyTuple, Relation, SubjectKind};

use crate::client::PolicyEngineClient;
use crate::error::PolicyError;

fn qualify(entity_type: impl ToString, id: &str) -> String {
    format!("{}:{id}", entity_type.to_string())
}

/// Stands in for the real engine's named-permission expansion (§4.4's
/// "permission... the engine maps onto one or more relations internally"):
/// a human verb like `"admin"` is checked via [`Permission::grants`]'s
/// lattice; anything else (the precondition helpers in
/// [`crate::agent::PolicyAgent`] pass a bare relation name, e.g.
/// `"administrator"`) falls back to an exact relation match.
fn relation_satisfies(relation: Relation, permission: &str) -> bool {
    match Permission::from_str(permission) {
        Ok(perm) => perm.grants(relation),
        Err(_) => relation.to_string() == permission,
    }
}

/// In-process stand-in for the external relation-tuple engine, used by
/// integration tests so the two-phase write and precondition tests in §8 run
/// without a live gRPC server.
#[derive(Default)]
pub struct FakePolicyEngine {
    tuples: Mutex<HashSet<PolicyTuple>>,
}

impl FakePolicyEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, tuple: &PolicyTuple) -> bool {
        self.tuples.lock().expect("fake engine mutex poisoned").contains(tuple)
    }
}

#[async_trait]
impl PolicyEngineClient for FakePolicyEngine {
    async fn check(&self, req: &PolicyReq) -> Result<bool, PolicyError> {
        if matches!(req.subject_kind, SubjectKind::Token) {
            return Err(PolicyError::Precondition(
                "fake engine requires subject_kind=Id, resolve tokens before calling check".into(),
            ));
        }
        let object = qualify(req.object_type, &req.object);
        let tuples = self.tuples.lock().expect("fake engine mutex poisoned");
        Ok(tuples.iter().any(|t| {
            qualify(t.subject_type, &t.subject) == req.subject
                && qualify(t.object_type, &t.object) == object
                && relation_satisfies(t.relation, &req.permission)
        }))
    }

    async fn write(&self, new_tuples: &[PolicyTuple]) -> Result<(), PolicyError> {
        let mut tuples = self.tuples.lock().expect("fake engine mutex poisoned");
        tuples.extend(new_tuples.iter().cloned());
        Ok(())
    }

    async fn delete(&self, targets: &[PolicyTuple]) -> Result<(), PolicyError> {
        let mut tuples = self.tuples.lock().expect("fake engine mutex poisoned");
        for target in targets {
            tuples.remove(target);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError> {
        let tuples = self.tuples.lock().expect("fake engine mutex poisoned");
        let items: Vec<String> = tuples
            .iter()
            .filter(|t| {
                qualify(t.subject_type, &t.subject) == req.subject
                    && relation_satisfies(t.relation, &req.permission)
            })
            .map(|t| qualify(t.object_type, &t.object))
            .skip(page.cursor.as_ref().and_then(|c| c.parse().ok()).unwrap_or(0usize))
            .take(page.limit as usize)
            .collect();
        Ok(PageResult {
            items,
            next_cursor: None,
        })
    }

    async fn list_subjects(
        &self,
        req: &PolicyReq,
        page: &Page,
    ) -> Result<PageResult<String>, PolicyError> {
        let tuples = self.tuples.lock().expect("fake engine mutex poisoned");
        let items: Vec<String> = tuples
            .iter()
            .filter(|t| {
                qualify(t.object_type, &t.object) == req.object
                    && relation_satisfies(t.relation, &req.permission)
            })
            .map(|t| qualify(t.subject_type, &t.subject))
            .skip(page.cursor.as_ref().and_then(|c| c.parse().ok()).unwrap_or(0usize))
            .take(page.limit as usize)
            .collect();
        Ok(PageResult {
            items,
            next_cursor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotauth_types::policy::{EntityType, Relation};

    fn tuple() -> PolicyTuple {
        PolicyTuple {
            subject_type: EntityType::User,
            subject: "u1".into(),
            subject_relation: None,
            relation: Relation::Administrator,
            object_type: EntityType::Domain,
            object: "d1".into(),
        }
    }

    #[tokio::test]
    async fn write_then_check_succeeds() {
        let engine = FakePolicyEngine::new();
        engine.write(&[tuple()]).await.unwrap();
        let req = PolicyReq {
            subject_type: EntityType::User,
            subject_kind: SubjectKind::Id,
            subject: "user:u1".into(),
            permission: "administrator".into(),
            object_type: EntityType::Domain,
            object: "d1".into(),
        };
        assert!(engine.check(&req).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_tuple() {
        let engine = FakePolicyEngine::new();
        engine.write(&[tuple()]).await.unwrap();
        engine.delete(&[tuple()]).await.unwrap();
        assert!(!engine.contains(&tuple()));
    }
}
