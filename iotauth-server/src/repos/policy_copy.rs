use std::sync::Arc;

use iotauth_storage::Pool;
use iotauth_types::error::ErrorKind;
use iotauth_types::policy::PolicyCopy;

use crate::error::from_storage;

pub const POLICIES_TABLE: &str = "policies";

/// The local mirror of user↔domain tuples (§3 Policy Copy Row, §4.3).
/// Inserts are upsert-or-ignore and deletes of a missing row are a no-op,
/// matching the teacher's `PolicyRepo::remove` "affected rows tells you
/// whether it mattered" idiom.
pub struct PolicyCopyRepo {
    pool: Arc<Pool>,
}

impl Clone for PolicyCopyRepo {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl PolicyCopyRepo {
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self))]
    pub async fn save(&self, row: &PolicyCopy) -> Result<(), ErrorKind> {
        sqlx::query(&format!(
            "INSERT INTO {POLICIES_TABLE}
                (subject_type, subject_id, relation, object_type, object_id)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (subject_type, subject_id, relation, object_type, object_id) DO NOTHING"
        ))
        .bind(row.subject_type.to_string())
        .bind(&row.subject_id)
        .bind(row.relation.to_string())
        .bind(row.object_type.to_string())
        .bind(&row.object_id)
        .execute(self.pool.as_ref())
        .await
        .map(|_| ())
        .map_err(from_storage)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, row: &PolicyCopy) -> Result<(), ErrorKind> {
        sqlx::query(&format!(
            "DELETE FROM {POLICIES_TABLE}
                WHERE subject_type = ? AND subject_id = ? AND relation = ?
                AND object_type = ? AND object_id = ?"
        ))
        .bind(row.subject_type.to_string())
        .bind(&row.subject_id)
        .bind(row.relation.to_string())
        .bind(row.object_type.to_string())
        .bind(&row.object_id)
        .execute(self.pool.as_ref())
        .await
        .map(|_| ())
        .map_err(from_storage)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_for_subject(&self, subject_id: &str) -> Result<Vec<PolicyCopy>, ErrorKind> {
        sqlx::query_as(&format!(
            "SELECT * FROM {POLICIES_TABLE} WHERE subject_id = ?"
        ))
        .bind(subject_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(from_storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotauth_types::policy::{EntityType, Relation};

    async fn repo() -> PolicyCopyRepo {
        let pool = Arc::new(iotauth_storage::connect_tmp().await);
        crate::migrations::migrate(&pool).await.unwrap();
        PolicyCopyRepo::new(pool)
    }

    fn row() -> PolicyCopy {
        PolicyCopy::new(
            EntityType::User,
            "u1".into(),
            Relation::Administrator,
            EntityType::Domain,
            "d1".into(),
        )
    }

    #[tokio::test]
    async fn save_is_idempotent() {
        let repo = repo().await;
        repo.save(&row()).await.unwrap();
        repo.save(&row()).await.unwrap();
        assert_eq!(repo.list_for_subject("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let repo = repo().await;
        repo.delete(&row()).await.unwrap();
        assert!(repo.list_for_subject("u1").await.unwrap().is_empty());
    }
}
