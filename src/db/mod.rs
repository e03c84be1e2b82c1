pub mod queries;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::billing::BillingClient;
use crate::config::Config;
use crate::error::Result;
use crate::notify::Notifier;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub billing: BillingClient,
    pub notifier: Notifier,
}

#[derive(Debug)]
struct ConnectionPragmas;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        // WAL so concurrent readers don't block the single writer; busy
        // timeout so racing IMMEDIATE transactions queue instead of failing
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Ok(())
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = r2d2::Pool::builder()
        .connection_customizer(Box::new(ConnectionPragmas))
        .build(manager)
        .map_err(crate::error::AppError::Pool)?;
    Ok(pool)
}

/// Create tables and indexes. Idempotent; run at startup.
///
/// The UNIQUE constraints on `licenses.license_key` and
/// `machines(license_id, machine_id)` are the storage-level backstop for the
/// key-uniqueness and activation-idempotence invariants - they hold even if
/// application-level checks are bypassed.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            billing_customer_id TEXT NOT NULL,
            billing_subscription_id TEXT,
            plan TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER,
            last_validated_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_licenses_subscription
            ON licenses(billing_subscription_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_customer
            ON licenses(billing_customer_id);

        CREATE TABLE IF NOT EXISTS machines (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id),
            machine_id TEXT NOT NULL,
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            UNIQUE(license_id, machine_id)
        );

        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}
