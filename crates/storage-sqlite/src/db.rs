//! Connection pool setup, pragmas, and embedded migrations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::{Connection, QueryResult, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::errors::StorageError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub type SqlitePooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Applies the cache's connection pragmas. WAL journaling lets readers
/// keep seeing the last committed snapshot while a write transaction is
/// open on another connection.
fn apply_pragmas(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute(&format!(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
    ))
}

#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        apply_pragmas(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Builds the read pool for the cache database at `db_path`.
pub fn create_pool(db_path: &Path) -> Result<Arc<SqlitePool>, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
    let pool = Pool::builder()
        .connection_customizer(Box::new(ConnectionPragmas))
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;
    Ok(Arc::new(pool))
}

/// Opens a standalone connection with the cache pragmas applied.
pub fn establish_connection(db_path: &Path) -> Result<SqliteConnection, StorageError> {
    let mut conn = SqliteConnection::establish(&db_path.to_string_lossy())?;
    apply_pragmas(&mut conn)?;
    Ok(conn)
}

pub fn get_connection(pool: &SqlitePool) -> Result<SqlitePooledConnection, StorageError> {
    pool.get().map_err(StorageError::from)
}

/// Runs all pending embedded migrations. The history is additive; rerun
/// on every open.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), StorageError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|err| StorageError::Migration(err.to_string()))
}
