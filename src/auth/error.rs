//! Error kinds surfaced by the session layer and its stores.

/// Failures raised by an [`IdentityStore`](super::IdentityStore) or
/// [`GenerationStore`](super::GenerationStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An identity with the same email already exists.
    #[error("identity with this email already exists")]
    DuplicateIdentity,

    /// No identity, or no current generation for it.
    #[error("identity not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

/// Errors returned by [`SessionService`](super::SessionService) operations.
///
/// `Unauthorized` deliberately carries nothing: callers must not be able to
/// tell a bad signature from an expired token or a stale generation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("identity with this email already exists")]
    DuplicateIdentity,

    #[error("identity not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{op}: storage failure: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{op}: {source}")]
    Signing {
        op: &'static str,
        #[source]
        source: super::CodecError,
    },

    #[error("{op}: deadline exceeded")]
    DeadlineExceeded { op: &'static str },
}

impl SessionError {
    pub(crate) fn storage(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            op,
            source: source.into(),
        }
    }

    /// Lift a store failure into the session taxonomy, tagging plain
    /// database errors with the operation that hit them.
    pub(crate) fn from_store(op: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::DuplicateIdentity => Self::DuplicateIdentity,
            StoreError::NotFound => Self::NotFound,
            StoreError::Database(e) => Self::storage(op, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_carries_no_detail() {
        assert_eq!(SessionError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn store_errors_keep_their_kind() {
        assert!(matches!(
            SessionError::from_store("auth.test", StoreError::DuplicateIdentity),
            SessionError::DuplicateIdentity
        ));
        assert!(matches!(
            SessionError::from_store("auth.test", StoreError::NotFound),
            SessionError::NotFound
        ));
    }

    #[test]
    fn database_errors_are_tagged_with_operation() {
        let err = SessionError::from_store(
            "auth.create_identity",
            StoreError::Database(rusqlite::Error::QueryReturnedNoRows),
        );
        assert!(matches!(err, SessionError::Storage { op: "auth.create_identity", .. }));
        assert!(err.to_string().starts_with("auth.create_identity: storage failure"));
    }
}
