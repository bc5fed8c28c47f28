//! Authentication Middleware
//!
//! JWT validation for every collaboration endpoint. Browsers cannot set
//! headers on a WebSocket handshake, so the token is also accepted as the
//! `access_token` query parameter.

use axum::{
    extract::{Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::domain::{Role, UserId};
use crate::shared::error::AppError;
use crate::startup::AppState;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Platform role
    #[serde(default)]
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
}

/// Authenticated user extension
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: UserId::new(claims.sub),
            role: claims.role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Validate an HS256 access token.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".into())
        }
        _ => AppError::Unauthorized("Invalid token".into()),
    })?;

    if token_data.claims.sub.is_empty() {
        return Err(AppError::Unauthorized("Invalid token claims".into()));
    }

    Ok(token_data.claims)
}

/// Sign an access token. Token issuance belongs to the platform; this exists
/// for local development and tests.
pub fn issue_token(
    secret: &str,
    user_id: &UserId,
    role: Role,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: now + ttl_secs,
        iat: now,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

/// Extract the bearer credential from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
        .filter(|t| !t.is_empty())
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let query_token = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty());

    let token = match bearer_token(request.headers()) {
        Some(token) => token,
        None => query_token
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?,
    };

    let claims = decode_token(&state.settings.jwt.secret, &token)?;

    // Insert authenticated user into request extensions
    request.extensions_mut().insert(AuthUser::from(claims));

    // Continue to the next handler
    Ok(next.run(request).await)
}
