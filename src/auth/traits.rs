//! Storage contracts the session service is written against.
//!
//! Both stores operate on a transaction owned by the caller, so several
//! store calls compose into one atomic unit. Any type satisfying these
//! contracts can stand in for the SQLite implementations.

use rusqlite::Transaction;
use uuid::Uuid;

use super::{IdentityWithGeneration, StoreError};

/// Persisted identities.
pub trait IdentityStore: Send + Sync + 'static {
    /// Insert a new identity. A duplicate email yields
    /// [`StoreError::DuplicateIdentity`].
    fn create(&self, tx: &Transaction<'_>, email: &str) -> Result<Uuid, StoreError>;

    /// Fetch an identity joined with its current refresh generation.
    /// Missing identity or missing generation yields [`StoreError::NotFound`].
    fn get_by_id_with_generation(
        &self,
        tx: &Transaction<'_>,
        id: Uuid,
    ) -> Result<IdentityWithGeneration, StoreError>;
}

/// The single current refresh generation per identity.
pub trait GenerationStore: Send + Sync + 'static {
    /// Insert a new generation and return its storage-assigned id.
    fn create(&self, tx: &Transaction<'_>, owner_id: Uuid) -> Result<i64, StoreError>;

    /// Remove every generation row owned by `owner_id`. Deleting nothing is
    /// not an error.
    fn delete(&self, tx: &Transaction<'_>, owner_id: Uuid) -> Result<(), StoreError>;
}
