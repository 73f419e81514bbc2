use std::sync::Arc;

use chrono::Utc;
use iotauth_storage::Pool;
use iotauth_types::domain::{Domain, DomainPatch, DomainStatus};
use iotauth_types::error::ErrorKind;
use iotauth_types::page::{Page, PageResult};
use ulid::Ulid;

use crate::error::from_storage;

pub const DOMAINS_TABLE: &str = "domains";

/// Persists domain records (§4.3), grounded in the teacher's `NamespaceRepo`
/// CRUD shape, generalized from a parent-pointer tree to a flat,
/// policy-engine-owned hierarchy.
pub struct DomainRepo {
    pool: Arc<Pool>,
}

impl Clone for DomainRepo {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl DomainRepo {
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, domain))]
    pub async fn save(&self, domain: &Domain) -> Result<(), ErrorKind> {
        sqlx::query(&format!(
            "INSERT INTO {DOMAINS_TABLE}
                (id, name, alias, tags, metadata, status, created_by, created_at, updated_by, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(domain.id.to_string())
        .bind(&domain.name)
        .bind(&domain.alias)
        .bind(serde_json::to_string(&domain.tags).unwrap_or_default())
        .bind(serde_json::to_string(&domain.metadata).unwrap_or_default())
        .bind(domain.status.to_string())
        .bind(&domain.created_by)
        .bind(domain.created_at)
        .bind(&domain.updated_by)
        .bind(domain.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map(|_| ())
        .map_err(from_storage)
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve_by_id(&self, id: Ulid) -> Result<Domain, ErrorKind> {
        sqlx::query_as(&format!("SELECT * FROM {DOMAINS_TABLE} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(from_storage)?
            .ok_or_else(|| ErrorKind::NotFound(format!("domain `{id}`")))
    }

    #[tracing::instrument(skip(self, updated_by, patch))]
    pub async fn update(
        &self,
        id: Ulid,
        updated_by: &str,
        patch: &DomainPatch,
    ) -> Result<Domain, ErrorKind> {
        let mut domain = self.retrieve_by_id(id).await?;
        if let Some(name) = &patch.name {
            domain.name = name.clone();
        }
        if let Some(alias) = &patch.alias {
            domain.alias = alias.clone();
        }
        if let Some(tags) = &patch.tags {
            domain.tags = tags.clone();
        }
        if let Some(metadata) = &patch.metadata {
            domain.metadata = metadata.clone();
        }
        domain.updated_by = updated_by.to_string();
        domain.updated_at = Utc::now();

        sqlx::query(&format!(
            "UPDATE {DOMAINS_TABLE}
                SET name = ?, alias = ?, tags = ?, metadata = ?, updated_by = ?, updated_at = ?
                WHERE id = ?"
        ))
        .bind(&domain.name)
        .bind(&domain.alias)
        .bind(serde_json::to_string(&domain.tags).unwrap_or_default())
        .bind(serde_json::to_string(&domain.metadata).unwrap_or_default())
        .bind(&domain.updated_by)
        .bind(domain.updated_at)
        .bind(id.to_string())
        .execute(self.pool.as_ref())
        .await
        .map_err(from_storage)?;

        Ok(domain)
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_status(
        &self,
        id: Ulid,
        updated_by: &str,
        status: DomainStatus,
    ) -> Result<Domain, ErrorKind> {
        if matches!(status, DomainStatus::All) {
            return Err(ErrorKind::MalformedEntity(
                "status must be enabled or disabled".into(),
            ));
        }
        sqlx::query(&format!(
            "UPDATE {DOMAINS_TABLE} SET status = ?, updated_by = ?, updated_at = ? WHERE id = ?"
        ))
        .bind(status.to_string())
        .bind(updated_by)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(self.pool.as_ref())
        .await
        .map_err(from_storage)?;
        self.retrieve_by_id(id).await
    }

    /// Lists domains, optionally scoped to a subject's membership via the
    /// policy-copy journal (§4.5.8's "clear the subjectID filter for
    /// platform admins" resolves to omitting this join).
    #[tracing::instrument(skip(self, page))]
    pub async fn list(&self, page: &Page) -> Result<PageResult<Domain>, ErrorKind> {
        let cursor = page.cursor.clone().unwrap_or_default();
        let limit = i64::from(page.limit.max(1));

        let domains: Vec<Domain> = if let Some(subject_id) = &page.subject_id {
            sqlx::query_as(&format!(
                "SELECT D.* FROM {DOMAINS_TABLE} D
                    INNER JOIN policies P ON P.object_type = 'domain' AND P.object_id = D.id
                    WHERE P.subject_type = 'user' AND P.subject_id = ? AND D.id > ?
                    ORDER BY D.id ASC LIMIT ?"
            ))
            .bind(subject_id)
            .bind(&cursor)
            .bind(limit + 1)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(from_storage)?
        } else {
            sqlx::query_as(&format!(
                "SELECT * FROM {DOMAINS_TABLE} WHERE id > ? ORDER BY id ASC LIMIT ?"
            ))
            .bind(&cursor)
            .bind(limit + 1)
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(from_storage)?
        };

        let mut domains = domains;
        let next_cursor = if domains.len() > limit as usize {
            domains.truncate(limit as usize);
            domains.last().map(|d| d.id.to_string())
        } else {
            None
        };

        Ok(PageResult {
            items: domains,
            next_cursor,
        })
    }

    #[tracing::instrument(skip(self, ids))]
    pub async fn retrieve_all_by_ids(&self, ids: &[Ulid]) -> Result<Vec<Domain>, ErrorKind> {
        let mut domains = Vec::with_capacity(ids.len());
        for id in ids {
            domains.push(self.retrieve_by_id(*id).await?);
        }
        Ok(domains)
    }
}
