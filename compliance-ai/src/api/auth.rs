//! Bearer token extractor for HTTP handlers
//!
//! Same verification as the notification sockets: signature, expiry and token version.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use compliance_common::auth::{authenticate, AuthError};

use crate::error::ApiError;
use crate::AppState;

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        let claims = authenticate(&state.db, &state.config.jwt_secret, token)
            .await
            .map_err(|e| match e {
                AuthError::DatabaseError(msg) => ApiError::Internal(msg),
                other => ApiError::Unauthorized(other.to_string()),
            })?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
