use sha2::{Digest, Sha384};
use sqlx::{Executor, SqlitePool};

const MIGRATIONS_TABLE: &str = "_MIGRATIONS";

#[derive(Debug)]
pub struct MigrationScript {
    pub script: String,
    pub description: String,
}

async fn create_migration_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE}(
        version INTEGER NOT NULL PRIMARY KEY,
        description TEXT NOT NULL,
        checksum BLOB NOT NULL,
        created_at TIMESTAMP NOT NULL
    )"
    );
    pool.execute(sql.as_str()).await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct LatestMigration {
    latest_version: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("sqlx error")]
    Db(#[from] sqlx::Error),
    #[error("unable to parse migration script `{filename}`")]
    Script { filename: String, error: String },
    #[error("unable to execute migration script `{filename}`")]
    Execution {
        filename: String,
        error: sqlx::Error,
    },
}

/// Apply embedded [`MigrationScript`]s in order, skipping any already
/// recorded in `_MIGRATIONS`.
///
/// # Errors
///
/// Returns an error if any migration script fails to parse or execute.
pub async fn migrate(pool: &SqlitePool, migrations: &[MigrationScript]) -> Result<(), MigrationError> {
    create_migration_table(pool).await?;

    let latest: Option<LatestMigration> =
        sqlx::query_as(&format!("SELECT MAX(version) AS latest_version FROM {MIGRATIONS_TABLE}"))
            .fetch_optional(pool)
            .await?;
    let last_applied = latest.and_then(|m| m.latest_version);

    for (version, migration) in migrations.iter().enumerate() {
        if let Some(last_applied) = last_applied {
            if last_applied >= version as i64 {
                continue;
            }
        }

        let checksum = Sha384::digest(migration.script.as_bytes()).to_vec();
        let mut tx = pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, description, checksum, created_at)
                VALUES (?, ?, ?, ?)"
        ))
        .bind(version as i64)
        .bind(&migration.description)
        .bind(checksum)
        .bind(chrono::Utc::now())
        .execute(&mut tx)
        .await
        .map_err(|error| MigrationError::Execution {
            filename: migration.description.clone(),
            error,
        })?;

        tx.execute(migration.script.as_str())
            .await
            .map_err(|error| MigrationError::Execution {
                filename: migration.description.clone(),
                error,
            })?;

        tx.commit().await?;
    }

    Ok(())
}

/// Read [`MigrationScript`]s out of a type implementing [`rust_embed::RustEmbed`].
///
/// # Errors
///
/// Returns an error if any embedded file's contents are not valid UTF-8.
pub fn migration_scripts<M: rust_embed::RustEmbed>() -> Result<Vec<MigrationScript>, MigrationError>
{
    let mut names = M::iter().collect::<Vec<_>>();
    names.sort();

    let mut scripts = vec![];
    for name in names {
        let Some(file) = M::get(&name) else {
            return Err(MigrationError::Script {
                filename: name.to_string(),
                error: "embedded migration file missing".to_string(),
            });
        };
        let sql = String::from_utf8(file.data.to_vec()).map_err(|_| MigrationError::Script {
            filename: name.to_string(),
            error: "migration script is not valid UTF-8".to_string(),
        })?;
        scripts.push(MigrationScript {
            description: name.to_string(),
            script: sql,
        });
    }

    Ok(scripts)
}

#[derive(Debug, sqlx::FromRow)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub checksum: Vec<u8>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// List applied migrations.
///
/// # Errors
///
/// Returns an error if the query against `_MIGRATIONS` fails.
pub async fn list_migrations(pool: &SqlitePool) -> Result<Vec<Migration>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT * FROM {MIGRATIONS_TABLE} ORDER BY version"))
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::connect_tmp;

    #[tokio::test]
    async fn applies_migrations_in_order_and_is_idempotent() {
        let pool = connect_tmp().await;

        let mut migrations = vec![
            MigrationScript {
                description: "2024-01-01-keys.sql".into(),
                script: "CREATE TABLE keys (id TEXT PRIMARY KEY);".into(),
            },
            MigrationScript {
                description: "2024-01-02-domains.sql".into(),
                script: "CREATE TABLE domains (id TEXT PRIMARY KEY);".into(),
            },
        ];
        migrate(&pool, &migrations).await.unwrap();
        assert_eq!(list_migrations(&pool).await.unwrap().len(), 2);

        migrations.push(MigrationScript {
            description: "2024-01-03-policies.sql".into(),
            script: "CREATE TABLE policies (subject_id TEXT);".into(),
        });
        migrate(&pool, &migrations).await.unwrap();
        assert_eq!(list_migrations(&pool).await.unwrap().len(), 3);

        // Re-running is a no-op.
        migrate(&pool, &migrations).await.unwrap();
        assert_eq!(list_migrations(&pool).await.unwrap().len(), 3);

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"keys"));
        assert!(names.contains(&"domains"));
        assert!(names.contains(&"policies"));
    }
}
