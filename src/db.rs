//! Local SQLite database layer for the cylinder ledger.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings
//! helpers (unit price), and the shared connection state handed to every
//! component — opened once at process start, closed once at shutdown.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Shared state holding the database connection.
///
/// Constructed explicitly by [`init`] and passed to each component; no
/// component opens its own connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to [`Error::Lock`].
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Lock)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Default cylinder unit price when no `cylinder_price` setting exists.
pub const DEFAULT_CYLINDER_PRICE: f64 = 877.5;

/// Initialize the database at `{data_dir}/ledger.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("ledger.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// v1: base schema — delivery records, reconciliation remarks, employees,
/// settings.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            employee TEXT NOT NULL DEFAULT '',
            total_cyl INTEGER NOT NULL,
            empty_received INTEGER NOT NULL,
            online_pay INTEGER NOT NULL DEFAULT 0,
            paytm_pay INTEGER NOT NULL DEFAULT 0,
            partial_amt REAL NOT NULL DEFAULT 0,
            final_amt REAL NOT NULL DEFAULT 0,
            collected_amt REAL NOT NULL DEFAULT 0,
            date_time TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS remarks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id INTEGER NOT NULL
                REFERENCES records(id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            remark_type TEXT NOT NULL,
            consumer_name TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            UNIQUE(record_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_remarks_record
            ON remarks(record_id);

        CREATE TABLE IF NOT EXISTS employees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    info!("Applied migration v1 (base schema)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Current cylinder unit price, or [`DEFAULT_CYLINDER_PRICE`] if unset or
/// unparsable.
pub fn get_unit_price(conn: &Connection) -> f64 {
    get_setting(conn, "cylinder_price")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(DEFAULT_CYLINDER_PRICE)
}

/// Overwrite the cylinder unit price.
///
/// Non-positive values are accepted for backward compatibility but logged,
/// since every subsequent amount-due computation will use them.
pub fn set_unit_price(conn: &Connection, price: f64) -> Result<()> {
    if price <= 0.0 {
        warn!("Setting non-positive cylinder price: {price}");
    }
    set_setting(conn, "cylinder_price", &price.to_string())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// In-memory database with full schema (test helper).
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
