//! Delivery agent registry.
//!
//! A flat list of agent names, unique by name. The delivery builder
//! validates non-empty agent names against this list.

use rusqlite::params;
use tracing::info;

use crate::db::DbState;
use crate::error::{Error, Result};

/// All registered agent names, ordered by name.
pub fn list_employees(db: &DbState) -> Result<Vec<String>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM employees ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Register a new agent.
///
/// The name is trimmed; an empty name is rejected. A duplicate name
/// surfaces the UNIQUE constraint violation as [`Error::Storage`].
pub fn add_employee(db: &DbState, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("employee name must not be empty".into()));
    }

    let conn = db.lock()?;
    conn.execute("INSERT INTO employees (name) VALUES (?1)", params![name])?;
    info!("Registered employee '{name}'");
    Ok(())
}

/// Whether `name` is a registered agent.
pub fn employee_exists(db: &DbState, name: &str) -> Result<bool> {
    let conn = db.lock()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM employees WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
