//! SQLite-backed refresh generation store.
//!
//! One row per identity. Rotation is a delete followed by a create inside
//! the caller's transaction; `UNIQUE(owner_id)` backs the invariant.

use chrono::Utc;
use rusqlite::{params, Transaction};
use uuid::Uuid;

use super::{GenerationStore, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteGenerationStore;

impl SqliteGenerationStore {
    pub fn new() -> Self {
        Self
    }
}

impl GenerationStore for SqliteGenerationStore {
    fn create(&self, tx: &Transaction<'_>, owner_id: Uuid) -> Result<i64, StoreError> {
        tx.execute(
            "INSERT INTO refresh_generations (owner_id, created_at) VALUES (?1, ?2)",
            params![owner_id.to_string(), Utc::now().timestamp()],
        )?;
        let generation_id = tx.last_insert_rowid();
        tracing::debug!(identity_id = %owner_id, generation_id, "Refresh generation created");
        Ok(generation_id)
    }

    fn delete(&self, tx: &Transaction<'_>, owner_id: Uuid) -> Result<(), StoreError> {
        let deleted = tx.execute(
            "DELETE FROM refresh_generations WHERE owner_id = ?1",
            params![owner_id.to_string()],
        )?;
        tracing::debug!(identity_id = %owner_id, deleted, "Refresh generation deleted");
        Ok(())
    }
}
