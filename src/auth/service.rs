//! Session lifecycle: identity creation, token issuance, refresh rotation
//! and bearer resolution.
//!
//! Every operation runs inside exactly one database transaction on Tokio's
//! blocking pool. The transaction commits only after every step succeeded
//! and only while the operation's deadline has not passed; any other exit
//! rolls back.

use rusqlite::{Transaction, TransactionBehavior};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    Email, GenerationStore, Identity, IdentityStore, RequestContext, SessionError,
    SqliteGenerationStore, SqliteIdentityStore, TokenCodec, TokenPair,
};
use crate::config::TokenSettings;
use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxMode {
    Read,
    /// Takes the write lock at BEGIN so read-then-decide sequences on the
    /// same identity serialise.
    Write,
}

/// Signs access/refresh pairs with the configured secrets.
#[derive(Debug, Clone)]
struct PairSigner {
    codec: TokenCodec,
    settings: Arc<TokenSettings>,
}

impl PairSigner {
    fn sign(
        &self,
        op: &'static str,
        owner_id: Uuid,
        client_ip: &str,
        generation_id: i64,
    ) -> Result<TokenPair, SessionError> {
        let access_token = self
            .codec
            .issue(
                owner_id,
                client_ip,
                generation_id,
                &self.settings.access_secret,
                self.settings.access_lifetime,
            )
            .map_err(|source| SessionError::Signing { op, source })?;
        let refresh_token = self
            .codec
            .issue(
                owner_id,
                client_ip,
                generation_id,
                &self.settings.refresh_secret,
                self.settings.refresh_lifetime,
            )
            .map_err(|source| SessionError::Signing { op, source })?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

pub struct SessionService<I = SqliteIdentityStore, G = SqliteGenerationStore> {
    pool: DbPool,
    identities: Arc<I>,
    generations: Arc<G>,
    signer: PairSigner,
    operation_timeout: Duration,
}

impl<I, G> Clone for SessionService<I, G> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            identities: Arc::clone(&self.identities),
            generations: Arc::clone(&self.generations),
            signer: self.signer.clone(),
            operation_timeout: self.operation_timeout,
        }
    }
}

impl SessionService {
    /// Service backed by the SQLite stores.
    pub fn sqlite(pool: DbPool, settings: TokenSettings, operation_timeout: Duration) -> Self {
        Self::new(
            pool,
            SqliteIdentityStore::new(),
            SqliteGenerationStore::new(),
            settings,
            operation_timeout,
        )
    }
}

impl<I: IdentityStore, G: GenerationStore> SessionService<I, G> {
    pub fn new(
        pool: DbPool,
        identities: I,
        generations: G,
        settings: TokenSettings,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            identities: Arc::new(identities),
            generations: Arc::new(generations),
            signer: PairSigner {
                codec: TokenCodec::new(settings.issuer.clone()),
                settings: Arc::new(settings),
            },
            operation_timeout,
        }
    }

    /// Register a new identity together with its first refresh generation.
    pub async fn create_identity(
        &self,
        ctx: &RequestContext,
        email: &Email,
        client_ip: &str,
    ) -> Result<Uuid, SessionError> {
        const OP: &str = "auth.create_identity";

        let identities = Arc::clone(&self.identities);
        let generations = Arc::clone(&self.generations);
        let email = email.as_str().to_string();

        async move {
            let id = self
                .run_in_tx(OP, ctx, TxMode::Write, move |tx| {
                    let id = identities
                        .create(tx, &email)
                        .map_err(|e| SessionError::from_store(OP, e))?;
                    generations
                        .create(tx, id)
                        .map_err(|e| SessionError::from_store(OP, e))?;
                    Ok(id)
                })
                .await
                .inspect_err(log_failure)?;

            tracing::info!(identity_id = %id, client_ip, "Identity created");
            Ok(id)
        }
        .instrument(op_span(OP, ctx))
        .await
    }

    /// Issue a token pair bound to the identity's current generation.
    pub async fn issue_token_pair(
        &self,
        ctx: &RequestContext,
        identity_id: Uuid,
        client_ip: &str,
    ) -> Result<TokenPair, SessionError> {
        const OP: &str = "auth.issue_token_pair";

        let identities = Arc::clone(&self.identities);
        let signer = self.signer.clone();
        let client_ip = client_ip.to_string();

        async move {
            let pair = self
                .run_in_tx(OP, ctx, TxMode::Read, move |tx| {
                    let row = identities
                        .get_by_id_with_generation(tx, identity_id)
                        .map_err(|e| SessionError::from_store(OP, e))?;
                    signer.sign(OP, row.id, &client_ip, row.generation_id)
                })
                .await
                .inspect_err(log_failure)?;

            tracing::info!(identity_id = %identity_id, "Token pair issued");
            Ok(pair)
        }
        .instrument(op_span(OP, ctx))
        .await
    }

    /// Redeem a refresh token: verify it, check it carries the live
    /// generation, rotate the generation and issue a new pair.
    ///
    /// A given refresh token can succeed at most once.
    pub async fn refresh_token_pair(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        client_ip: &str,
    ) -> Result<TokenPair, SessionError> {
        const OP: &str = "auth.refresh_token_pair";

        let identities = Arc::clone(&self.identities);
        let generations = Arc::clone(&self.generations);
        let signer = self.signer.clone();
        let client_ip = client_ip.to_string();

        async move {
            let claims = self
                .signer
                .codec
                .verify(refresh_token, &self.signer.settings.refresh_secret)
                .map_err(|_| SessionError::Unauthorized)
                .inspect_err(log_failure)?;
            let owner_id = claims.owner_id;

            let pair = self
                .run_in_tx(OP, ctx, TxMode::Write, move |tx| {
                    let row = identities
                        .get_by_id_with_generation(tx, claims.owner_id)
                        .map_err(|e| SessionError::from_store(OP, e))?;

                    // Advisory only: recorded, never enforced.
                    if claims.ip_address != client_ip {
                        tracing::warn!(
                            identity_id = %row.id,
                            issued_ip = %claims.ip_address,
                            client_ip = %client_ip,
                            "Refresh presented from a different address than issuance"
                        );
                    }

                    if claims.generation_id != row.generation_id {
                        tracing::warn!(
                            identity_id = %row.id,
                            presented = claims.generation_id,
                            current = row.generation_id,
                            "Stale refresh generation presented"
                        );
                        return Err(SessionError::Unauthorized);
                    }

                    generations
                        .delete(tx, row.id)
                        .map_err(|e| SessionError::from_store(OP, e))?;
                    let next = generations
                        .create(tx, row.id)
                        .map_err(|e| SessionError::from_store(OP, e))?;

                    signer.sign(OP, row.id, &client_ip, next)
                })
                .await
                .inspect_err(log_failure)?;

            tracing::info!(identity_id = %owner_id, "Refresh generation rotated");
            Ok(pair)
        }
        .instrument(op_span(OP, ctx))
        .await
    }

    /// Resolve the identity behind an access token.
    ///
    /// The token's generation is not compared with the live one: access
    /// tokens stay valid until expiry even after a rotation.
    pub async fn resolve_identity(
        &self,
        ctx: &RequestContext,
        access_token: &str,
    ) -> Result<Identity, SessionError> {
        const OP: &str = "auth.resolve_identity";

        let identities = Arc::clone(&self.identities);

        async move {
            let claims = self
                .signer
                .codec
                .verify(access_token, &self.signer.settings.access_secret)
                .map_err(|_| SessionError::Unauthorized)
                .inspect_err(log_failure)?;

            let identity = self
                .run_in_tx(OP, ctx, TxMode::Read, move |tx| {
                    identities
                        .get_by_id_with_generation(tx, claims.owner_id)
                        .map(Identity::from)
                        .map_err(|e| SessionError::from_store(OP, e))
                })
                .await
                .inspect_err(log_failure)?;

            tracing::debug!(identity_id = %identity.id, "Identity resolved");
            Ok(identity)
        }
        .instrument(op_span(OP, ctx))
        .await
    }

    /// Run `body` inside one transaction on the blocking pool.
    async fn run_in_tx<T, F>(
        &self,
        op: &'static str,
        ctx: &RequestContext,
        mode: TxMode,
        body: F,
    ) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, SessionError> + Send + 'static,
    {
        let deadline = ctx
            .deadline
            .unwrap_or_else(|| Instant::now() + self.operation_timeout);
        let pool = self.pool.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            run_blocking(&pool, op, mode, deadline, body)
        })
        .await
        .map_err(|e| SessionError::storage(op, e))?
    }
}

fn run_blocking<T, F>(
    pool: &DbPool,
    op: &'static str,
    mode: TxMode,
    deadline: Instant,
    body: F,
) -> Result<T, SessionError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, SessionError>,
{
    let remaining = time_left(op, deadline)?;

    let mut conn = pool
        .get_timeout(remaining)
        .map_err(|e| classify(op, deadline, e))?;
    // Lock waits must not outlive the deadline either.
    conn.busy_timeout(remaining)
        .map_err(|e| classify(op, deadline, e))?;

    let behavior = match mode {
        TxMode::Read => TransactionBehavior::Deferred,
        TxMode::Write => TransactionBehavior::Immediate,
    };
    let tx = conn
        .transaction_with_behavior(behavior)
        .map_err(|e| classify(op, deadline, e))?;

    let value = match body(&tx) {
        Ok(value) => value,
        Err(e) => {
            rollback(tx);
            return Err(e);
        }
    };

    if Instant::now() >= deadline {
        tracing::warn!("Deadline passed before commit, rolling back");
        rollback(tx);
        return Err(SessionError::DeadlineExceeded { op });
    }

    tx.commit().map_err(|e| classify(op, deadline, e))?;
    Ok(value)
}

fn time_left(op: &'static str, deadline: Instant) -> Result<Duration, SessionError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(SessionError::DeadlineExceeded { op });
    }
    Ok(remaining)
}

/// A storage error that surfaced after the deadline is reported as such.
fn classify(
    op: &'static str,
    deadline: Instant,
    err: impl Into<anyhow::Error>,
) -> SessionError {
    if Instant::now() >= deadline {
        SessionError::DeadlineExceeded { op }
    } else {
        SessionError::storage(op, err)
    }
}

fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        tracing::error!(error = %e, "Failed to roll back transaction");
    }
}

fn op_span(op: &'static str, ctx: &RequestContext) -> tracing::Span {
    tracing::info_span!("auth", op, request_id = %ctx.request_id)
}

fn log_failure(err: &SessionError) {
    match err {
        SessionError::Unauthorized => tracing::warn!("Request unauthorized"),
        SessionError::NotFound => tracing::debug!("Identity not found"),
        SessionError::DuplicateIdentity => tracing::debug!("Duplicate identity"),
        SessionError::Validation(reason) => tracing::debug!(reason, "Validation failed"),
        SessionError::DeadlineExceeded { .. } => tracing::warn!(error = %err, "Operation timed out"),
        SessionError::Storage { .. } | SessionError::Signing { .. } => {
            tracing::error!(error = ?err, "Operation failed");
        }
    }
}
