use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use strum::{Display, EnumString};
use ulid::Ulid;

/// The kind of credential a [`Key`] backs.
///
/// Ordinal values match the `type` private claim written into signed tokens
/// (§4.1): Access=0, Refresh=1, Recovery=2, API=3, Invitation=4. Serialized as
/// that integer ordinal, not the variant name, so the claim round-trips with
/// non-Rust peers the same way `grpc.rs`'s `key_type_to_i32` does for the gRPC
/// wire; `Display`/`EnumString` are kept for the string form used elsewhere
/// (query params, config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash)]
#[serde(into = "i64", try_from = "i64")]
#[strum(serialize_all = "snake_case")]
pub enum KeyType {
    Access = 0,
    Refresh = 1,
    Recovery = 2,
    Api = 3,
    Invitation = 4,
}

impl KeyType {
    /// Refresh and API keys carry a non-zero id and are persisted; the rest
    /// are stateless (§3 Key invariants).
    #[must_use]
    pub fn is_revocable(self) -> bool {
        matches!(self, Self::Refresh | Self::Api)
    }

    #[must_use]
    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Access),
            1 => Some(Self::Refresh),
            2 => Some(Self::Recovery),
            3 => Some(Self::Api),
            4 => Some(Self::Invitation),
            _ => None,
        }
    }
}

impl From<KeyType> for i64 {
    fn from(key_type: KeyType) -> Self {
        key_type as i64
    }
}

impl TryFrom<i64> for KeyType {
    type Error = String;

    fn try_from(ordinal: i64) -> Result<Self, Self::Error> {
        Self::from_ordinal(ordinal).ok_or_else(|| format!("unknown key type ordinal {ordinal}"))
    }
}

/// The unit issued by the tokenizer (§3 Data model — Key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Present only for revocable keys (Refresh, API); `Ulid::nil()` otherwise.
    pub id: Ulid,
    pub key_type: KeyType,
    /// The user id that caused this key to be issued.
    pub issuer: String,
    /// The effective principal carried as the token's `sub` claim.
    pub subject: String,
    /// The originating user id, always present even when `subject` has been
    /// rewritten to an encoded `domain_user` id (§4.5.5).
    pub user: String,
    pub domain: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// `None` for API keys means "never expires" (§3).
    pub expires_at: Option<DateTime<Utc>>,
}

/// Hand-rolled rather than derived: `id` and `key_type` are stored as plain
/// `TEXT`/`INTEGER` columns, and neither `Ulid` nor `KeyType` carries an
/// `sqlx::Type` impl for them to decode through directly.
impl<'r> sqlx::FromRow<'r, SqliteRow> for Key {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let key_type: i64 = row.try_get("type")?;
        Ok(Self {
            id: Ulid::from_str(&id).map_err(|e| sqlx::Error::ColumnDecode {
                index: "id".into(),
                source: Box::new(e),
            })?,
            key_type: KeyType::from_ordinal(key_type).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "type".into(),
                source: format!("unknown key type ordinal {key_type}").into(),
            })?,
            issuer: row.try_get("issuer")?,
            subject: row.try_get("subject")?,
            user: row.try_get("user")?,
            domain: row.try_get("domain")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl Key {
    #[must_use]
    pub fn new(
        key_type: KeyType,
        issuer: String,
        subject: String,
        user: String,
        domain: Option<String>,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let id = if key_type.is_revocable() {
            Ulid::new()
        } else {
            Ulid::nil()
        };
        Self {
            id,
            key_type,
            issuer,
            subject,
            user,
            domain,
            issued_at,
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_serializes_as_integer_ordinal() {
        assert_eq!(serde_json::to_string(&KeyType::Refresh).unwrap(), "1");
        assert_eq!(
            serde_json::from_str::<KeyType>("3").unwrap(),
            KeyType::Api
        );
        assert!(serde_json::from_str::<KeyType>("9").is_err());
    }

    #[test]
    fn revocable_types() {
        assert!(KeyType::Refresh.is_revocable());
        assert!(KeyType::Api.is_revocable());
        assert!(!KeyType::Access.is_revocable());
        assert!(!KeyType::Recovery.is_revocable());
        assert!(!KeyType::Invitation.is_revocable());
    }

    #[test]
    fn stateless_keys_have_nil_id() {
        let now = Utc::now();
        let key = Key::new(
            KeyType::Access,
            "u1".into(),
            String::new(),
            "u1".into(),
            None,
            now,
            Some(now + chrono::Duration::hours(1)),
        );
        assert!(key.id.is_nil());
    }

    #[test]
    fn revocable_keys_get_an_id() {
        let now = Utc::now();
        let key = Key::new(
            KeyType::Api,
            "u1".into(),
            "u1".into(),
            "u1".into(),
            None,
            now,
            None,
        );
        assert!(!key.id.is_nil());
        assert!(!key.is_expired(now));
    }
}
