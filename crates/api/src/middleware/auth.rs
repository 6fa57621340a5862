//! JWT authentication middleware and helpers.
//!
//! Provides JWT encoding/decoding plus an `AuthUser` Axum extractor that
//! resolves the caller to an active user on protected routes.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use casedesk_common::error::AppError;
use casedesk_common::types::Role;
use casedesk_engine::event::Actor;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the user's numeric ID
    pub sub: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated user extracted from a JWT.
///
/// The role is read from the users table on every request, so role changes
/// and deactivation take effect without reissuing tokens.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub role: Role,
    pub claims: Claims,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.user_id,
            role: self.role,
        }
    }
}

/// Encode a JWT token for a user.
pub fn encode_jwt(user_id: i64, secret: &str, expiry_hours: u64) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiry_hours as i64);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a JWT token.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

#[derive(Debug, Deserialize)]
struct TokenParam {
    token: Option<String>,
}

/// Pull the raw token from `Authorization: Bearer <token>`, falling back to
/// the `?token=` query parameter (browsers cannot set headers on EventSource).
fn extract_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string());

    from_header.or_else(|| {
        Query::<TokenParam>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(param)| param.token)
    })
}

/// Axum `FromRequestParts` implementation for `AuthUser`.
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();
        let pool = state.pool.clone();
        let token = extract_token(parts);

        async move {
            let Some(token) = token else {
                return Err(AppError::Auth(
                    "Missing Authorization header. Use 'Bearer <JWT>'".to_string(),
                ));
            };

            let claims = decode_jwt(&token, &secret)?;
            let user_id: i64 = claims
                .sub
                .parse()
                .map_err(|_| AppError::Auth("Invalid user ID in token".to_string()))?;

            let row: Option<(Role, bool, Option<DateTime<Utc>>)> =
                sqlx::query_as("SELECT role, is_active, deleted_at FROM users WHERE id = $1")
                    .bind(user_id)
                    .fetch_optional(&pool)
                    .await?;

            match row {
                Some((role, true, None)) => Ok(AuthUser {
                    user_id,
                    role,
                    claims,
                }),
                Some(_) => Err(AppError::Auth("Account is disabled".to_string())),
                None => Err(AppError::Auth("Unknown user".to_string())),
            }
        }
    }
}
