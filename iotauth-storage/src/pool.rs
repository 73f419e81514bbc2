use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Open a connection pool against `database_url` (a `sqlite://` URL or
/// `:memory:`), creating the backing file if it does not yet exist.
///
/// # Errors
///
/// Returns an error if the URL cannot be parsed or the pool fails to connect.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    SqlitePoolOptions::new().connect_with(options).await
}

/// An in-memory pool for tests, matching the teacher's `new_tmp` convenience
/// constructor.
///
/// # Panics
///
/// Panics if the in-memory pool cannot be created; only intended for tests.
pub async fn connect_tmp() -> SqlitePool {
    connect(":memory:")
        .await
        .expect("in-memory sqlite pool should always connect")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_in_memory_db() {
        let pool = connect_tmp().await;
        let res: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(res.0, 1);
    }
}
