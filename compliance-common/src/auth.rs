//! Token verification for notification sockets and API calls
//!
//! # Architecture
//!
//! - Tokens are HS256 JWTs carrying `sub` (user ID), `token_version` and `exp`
//! - A token is accepted only while its `token_version` equals the user's current
//!   version in the identity store; bumping the version ("log out everywhere")
//!   invalidates every token issued before it
//!
//! Pure functions plus one database lookup. No HTTP framework dependencies;
//! the service maps [`AuthError`] onto close codes and status codes itself.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token supplied
    MissingToken,

    /// Signature, format or expiry check failed
    InvalidToken(String),

    /// Token predates the user's current token version
    StaleTokenVersion { token: i64, current: i64 },

    /// Token subject not known to the identity store
    UnknownUser(String),

    /// Identity store lookup failed
    DatabaseError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing token"),
            AuthError::InvalidToken(reason) => write!(f, "Invalid token: {}", reason),
            AuthError::StaleTokenVersion { .. } => write!(f, "Token has been revoked"),
            AuthError::UnknownUser(user) => write!(f, "Unknown user: {}", user),
            AuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for AuthError {}

// ========================================
// Claims
// ========================================

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// User identity
    pub sub: String,
    /// User's token version at issue time
    pub token_version: i64,
    /// Expiry, seconds since the Unix epoch
    pub exp: usize,
}

/// Issue a token valid for `ttl`
///
/// Token issuance belongs to the identity service; this exists for tooling and tests.
pub fn issue_token(
    secret: &str,
    user_id: &str,
    token_version: i64,
    ttl: Duration,
) -> Result<String, AuthError> {
    let exp = (Utc::now() + ttl).timestamp().max(0) as usize;
    let claims = TokenClaims {
        sub: user_id.to_string(),
        token_version,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

/// Verify signature and expiry, returning the claims
pub fn decode_token(secret: &str, token: &str) -> Result<TokenClaims, AuthError> {
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }

    let validation = Validation::new(Algorithm::HS256);
    decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| AuthError::InvalidToken(e.to_string()))
}

/// Compare the token's version with the user's current one
pub fn check_token_version(claims: &TokenClaims, current: i64) -> Result<(), AuthError> {
    if claims.token_version != current {
        return Err(AuthError::StaleTokenVersion {
            token: claims.token_version,
            current,
        });
    }
    Ok(())
}

// ========================================
// Identity Store
// ========================================

/// Load a user's current token version
///
/// Returns `Ok(None)` when the user does not exist.
#[cfg(feature = "sqlx")]
pub async fn load_token_version(db: &SqlitePool, user_id: &str) -> Result<Option<i64>, AuthError> {
    sqlx::query_scalar::<_, i64>("SELECT token_version FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(db)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))
}

/// Full verification: signature, expiry, then token version against the identity store
#[cfg(feature = "sqlx")]
pub async fn authenticate(
    db: &SqlitePool,
    secret: &str,
    token: Option<&str>,
) -> Result<TokenClaims, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let claims = decode_token(secret, token)?;

    let current = load_token_version(db, &claims.sub)
        .await?
        .ok_or_else(|| AuthError::UnknownUser(claims.sub.clone()))?;
    check_token_version(&claims, current)?;

    Ok(claims)
}
