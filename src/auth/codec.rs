//! Signed bearer token codec (HS512 JWT).
//!
//! Access and refresh tokens share the same claim shape; the only thing
//! separating them is the secret each is signed with.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::Secret;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Claims embedded in every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerClaims {
    pub owner_id: Uuid,
    /// Address the token was issued to. Advisory only.
    pub ip_address: String,
    pub generation_id: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    pub iss: String,
    pub sub: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    /// Bad signature, malformed, wrong issuer or expired. Intentionally opaque.
    #[error("invalid token")]
    Invalid,
}

/// Stateless encoder/decoder for bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    issuer: String,
}

impl TokenCodec {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a token for `owner_id` that expires `lifetime` from now.
    pub fn issue(
        &self,
        owner_id: Uuid,
        ip_address: &str,
        generation_id: i64,
        secret: &Secret,
        lifetime: Duration,
    ) -> Result<String, CodecError> {
        self.issue_at(Utc::now(), owner_id, ip_address, generation_id, secret, lifetime)
    }

    pub(crate) fn issue_at(
        &self,
        now: DateTime<Utc>,
        owner_id: Uuid,
        ip_address: &str,
        generation_id: i64,
        secret: &Secret,
        lifetime: Duration,
    ) -> Result<String, CodecError> {
        let iat = now.timestamp();
        let lifetime_secs = i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX);
        let claims = BearerClaims {
            owner_id,
            ip_address: ip_address.to_string(),
            generation_id,
            exp: iat.saturating_add(lifetime_secs),
            iat,
            iss: self.issuer.clone(),
            sub: owner_id.to_string(),
        };

        encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(secret.expose()),
        )
        .map_err(CodecError::Sign)
    }

    /// Check signature, issuer and expiry, returning the embedded claims.
    pub fn verify(&self, token: &str, secret: &Secret) -> Result<BearerClaims, CodecError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        let claims = decode::<BearerClaims>(token, &DecodingKey::from_secret(secret.expose()), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                CodecError::Invalid
            })?;

        if claims.sub != claims.owner_id.to_string() {
            tracing::debug!("bearer token subject does not match owner");
            return Err(CodecError::Invalid);
        }

        Ok(claims)
    }
}
