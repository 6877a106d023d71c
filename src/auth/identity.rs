//! SQLite-backed identity store.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use super::{IdentityStore, IdentityWithGeneration, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteIdentityStore;

impl SqliteIdentityStore {
    pub fn new() -> Self {
        Self
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn create(&self, tx: &Transaction<'_>, email: &str) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let result = tx.execute(
            "INSERT INTO identities (id, email, created_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), email, Utc::now().timestamp()],
        );

        match result {
            Ok(_) => {
                tracing::debug!(identity_id = %id, "Identity created");
                Ok(id)
            }
            // Uniqueness is left to the index; a pre-check would race.
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                tracing::debug!("Duplicate email rejected");
                Err(StoreError::DuplicateIdentity)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_by_id_with_generation(
        &self,
        tx: &Transaction<'_>,
        id: Uuid,
    ) -> Result<IdentityWithGeneration, StoreError> {
        let row = tx
            .query_row(
                "SELECT i.email, g.generation_id
                 FROM identities i
                 JOIN refresh_generations g ON g.owner_id = i.id
                 WHERE i.id = ?1",
                params![id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((email, generation_id)) => {
                tracing::debug!(identity_id = %id, generation_id, "Identity fetched");
                Ok(IdentityWithGeneration {
                    id,
                    email,
                    generation_id,
                })
            }
            None => {
                tracing::debug!(identity_id = %id, "Identity or generation not found");
                Err(StoreError::NotFound)
            }
        }
    }
}
