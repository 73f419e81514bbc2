use iotauth_storage::migrator::MigrationError;
use iotauth_storage::Pool;
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "migrations/"]
pub(crate) struct Migrations;

pub(crate) async fn migrate(pool: &Pool) -> Result<(), MigrationError> {
    let migrations = iotauth_storage::migrator::migration_scripts::<Migrations>()?;
    iotauth_storage::migrator::migrate(pool, &migrations).await
}
