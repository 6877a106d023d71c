//! SQLite connection pool and schema bootstrap.
//!
//! Tables:
//! - `identities`: id, email (unique), created_at
//! - `refresh_generations`: generation_id (autoincrement), owner_id (unique), created_at

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::time::Duration;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// Open a pool against the configured database file, retrying the first
/// connection, then create the schema if it does not exist yet.
pub fn open_pool(config: &DatabaseConfig) -> Result<DbPool> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database dir: {}", parent.display())
            })?;
        }
    }

    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    let attempts = config.connect_attempts.max(1);
    let delay = Duration::from_millis(config.connect_delay_ms);

    let mut attempt = 1;
    let pool = loop {
        tracing::info!(attempt, path = %config.path.display(), "Database connection attempt");
        let manager = SqliteConnectionManager::file(&config.path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        match r2d2::Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
            .build(manager)
        {
            Ok(pool) => break pool,
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, error = %e, "Database connection failed, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to open database {} after {attempts} attempts",
                        config.path.display()
                    )
                });
            }
        }
    };

    let conn = pool.get().context("Failed to check out connection for schema setup")?;
    init_schema(&conn)?;
    tracing::info!(path = %config.path.display(), "Database connection established");

    Ok(pool)
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    // WAL mode for concurrent reads + crash safety
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous  = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    conn.busy_timeout(busy_timeout)
}

/// Idempotent schema creation.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS identities (
            id         TEXT PRIMARY KEY,
            email      TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS refresh_generations (
            generation_id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id      TEXT NOT NULL UNIQUE REFERENCES identities(id) ON DELETE CASCADE,
            created_at    INTEGER NOT NULL
        );",
    )
    .context("Failed to create schema")?;
    Ok(())
}
