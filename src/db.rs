use diesel::pg::PgConnection;
use diesel::r2d2;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::error::Error;

pub type DbPool = r2d2::Pool<r2d2::ConnectionManager<PgConnection>>;
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
pub type DbError = Box<dyn Error + Send + Sync + 'static>;

pub fn initialize_db_pool(database_url: &str) -> Result<DbPool, DbError> {
    let manager = r2d2::ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().build(manager)?;
    Ok(pool)
}

pub fn migration_connection(database_url: &str) -> Result<PgConnection, DbError> {
    Ok(PgConnection::establish(database_url)?)
}

pub fn run_migrations(
    connection: &mut impl MigrationHarness<diesel::pg::Pg>,
) -> Result<(), DbError> {
    let applied = connection.run_pending_migrations(MIGRATIONS)?;
    log::info!("Applied {} pending migrations", applied.len());
    Ok(())
}
