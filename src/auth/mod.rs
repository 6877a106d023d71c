//! Identity and session lifecycle.
//!
//! Provides:
//! - Identity registration keyed by a unique email
//! - Access/refresh token pairs signed as HS512 JWTs with separate secrets
//! - Single-use refresh rotation backed by a per-identity generation row
//! - SQLite-backed stores behind the [`IdentityStore`] / [`GenerationStore`] traits
//!
//! ## Design Decisions
//! - Refresh tokens are not stored; only the live generation id is. A
//!   refresh token is valid iff its embedded generation is the live one.
//! - Access tokens are not checked against the live generation, so they
//!   survive a rotation until they expire.
//! - The client address in a token is recorded, never enforced.

pub mod codec;
pub mod error;
pub mod generation;
pub mod identity;
pub mod models;
pub mod service;
pub mod traits;

pub use codec::{BearerClaims, CodecError, TokenCodec};
pub use error::{SessionError, StoreError};
pub use generation::SqliteGenerationStore;
pub use identity::SqliteIdentityStore;
pub use models::{Email, Identity, IdentityWithGeneration, RequestContext, Secret, TokenPair};
pub use service::SessionService;
pub use traits::{GenerationStore, IdentityStore};
