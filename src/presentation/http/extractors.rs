//! Custom Extractors
//!
//! Axum extractors for authentication and request parsing.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::domain::Role;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;

/// Reads the identity placed in request extensions by `auth_middleware`.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))
    }
}

/// A caller holding the professor role.
#[derive(Debug, Clone)]
pub struct Professor(pub AuthUser);

impl<S> FromRequestParts<S> for Professor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Professor {
            return Err(AppError::Forbidden(
                "Only professors can close a collaboration session".into(),
            ));
        }
        Ok(Professor(user))
    }
}
