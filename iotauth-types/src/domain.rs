use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strum::{Display, EnumString};
use ulid::Ulid;

/// A domain's lifecycle state (§4.6 state machine). `All` is a query-only
/// filter value and is never stored as a domain's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DomainStatus {
    Enabled,
    Disabled,
    All,
}

/// A user-scoped workspace, the unit of multi-tenancy (§3 Data model — Domain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: Ulid,
    pub name: String,
    pub alias: String,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: DomainStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    /// Derived at read time from the caller's relation to this domain; never
    /// persisted (§3: "derived `permission`").
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub permission: Option<String>,
}

/// Hand-rolled rather than derived: `id` is a plain `TEXT` column `Ulid`
/// doesn't carry an `sqlx::Type` impl for, `tags`/`metadata` are stored as
/// JSON-encoded `TEXT` rather than through `sqlx::types::Json`, and `status`
/// round-trips through its `Display`/`FromStr` pair, not a derived type.
impl<'r> sqlx::FromRow<'r, SqliteRow> for Domain {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let tags: String = row.try_get("tags")?;
        let metadata: String = row.try_get("metadata")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: Ulid::from_str(&id).map_err(|e| sqlx::Error::ColumnDecode {
                index: "id".into(),
                source: Box::new(e),
            })?,
            name: row.try_get("name")?,
            alias: row.try_get("alias")?,
            tags: serde_json::from_str(&tags).map_err(|e| sqlx::Error::ColumnDecode {
                index: "tags".into(),
                source: Box::new(e),
            })?,
            metadata: serde_json::from_str(&metadata).map_err(|e| sqlx::Error::ColumnDecode {
                index: "metadata".into(),
                source: Box::new(e),
            })?,
            status: DomainStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: Box::new(e),
            })?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_by: row.try_get("updated_by")?,
            updated_at: row.try_get("updated_at")?,
            permission: None,
        })
    }
}

impl Domain {
    #[must_use]
    pub fn new(
        name: String,
        alias: String,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
        status: DomainStatus,
        created_by: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            name,
            alias,
            tags,
            metadata,
            status,
            created_by: created_by.clone(),
            created_at: now,
            updated_by: created_by,
            updated_at: now,
            permission: None,
        }
    }
}

/// Partial update for `UpdateDomain` (§4.3). Only fields present here are
/// written; `updated_at`/`updated_by` are always stamped by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainPatch {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_domain_stamps_creator_as_updater() {
        let now = Utc::now();
        let domain = Domain::new(
            "acme".into(),
            "acme-alias".into(),
            vec![],
            HashMap::new(),
            DomainStatus::Enabled,
            "u1".into(),
            now,
        );
        assert_eq!(domain.created_by, "u1");
        assert_eq!(domain.updated_by, "u1");
        assert_eq!(domain.created_at, domain.updated_at);
        assert!(!domain.id.is_nil());
    }

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&DomainStatus::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");
        let status: DomainStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, DomainStatus::Disabled);
    }
}
