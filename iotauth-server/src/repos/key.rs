use std::sync::Arc;

use iotauth_types::key::Key;
use iotauth_types::error::ErrorKind;
use iotauth_storage::Pool;
use ulid::Ulid;

use crate::error::from_storage;

pub const KEYS_TABLE: &str = "keys";

/// Persists revocable keys (§4.2), grounded in the teacher's `TokenRepo`
/// shape: `Arc<Pool>`, one `sqlx::query`/`query_as` per operation,
/// `#[tracing::instrument(skip(self))]`.
pub struct KeyRepo {
    pool: Arc<Pool>,
}

impl Clone for KeyRepo {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl KeyRepo {
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self))]
    pub async fn save(&self, key: &Key) -> Result<(), ErrorKind> {
        sqlx::query(&format!(
            "INSERT INTO {KEYS_TABLE} (id, type, issuer, subject, user, domain, issued_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(key.id.to_string())
        .bind(key.key_type as i64)
        .bind(&key.issuer)
        .bind(&key.subject)
        .bind(&key.user)
        .bind(&key.domain)
        .bind(key.issued_at)
        .bind(key.expires_at)
        .execute(self.pool.as_ref())
        .await
        .map(|_| ())
        .map_err(from_storage)
    }

    #[tracing::instrument(skip(self))]
    pub async fn retrieve(&self, issuer: &str, id: Ulid) -> Result<Key, ErrorKind> {
        sqlx::query_as(&format!(
            "SELECT * FROM {KEYS_TABLE} WHERE issuer = ? AND id = ?"
        ))
        .bind(issuer)
        .bind(id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(from_storage)?
        .ok_or_else(|| ErrorKind::NotFound(format!("key `{id}`")))
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, issuer: &str, id: Ulid) -> Result<(), ErrorKind> {
        let res = sqlx::query(&format!("DELETE FROM {KEYS_TABLE} WHERE issuer = ? AND id = ?"))
            .bind(issuer)
            .bind(id.to_string())
            .execute(self.pool.as_ref())
            .await
            .map_err(from_storage)?;
        if res.rows_affected() == 0 {
            return Err(ErrorKind::NotFound(format!("key `{id}`")));
        }
        Ok(())
    }
}
