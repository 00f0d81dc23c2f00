use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::migration::Migrator;

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    connect_with(ConnectOptions::new(database_url)).await
}

pub async fn connect_with(options: ConnectOptions) -> Result<DatabaseConnection> {
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Bring the schema up to date.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    Migrator::up(conn, None).await?;
    Ok(())
}
