//! Collaboration REST Handlers
//!
//! Request/response views of a room, independent of the live socket. Lock
//! control goes through the room actor, so it is arbitrated together with the
//! socket envelopes.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::application::services::LockOutcome;
use crate::domain::envelope::close_code;
use crate::domain::{AssignmentId, Session, SessionId, UserId};
use crate::presentation::http::extractors::Professor;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Lock request/release response
#[derive(Debug, Serialize)]
pub struct LockResponse {
    /// For `/lock`: the caller holds the lock. For `/unlock`: the caller's
    /// lock was released.
    pub granted: bool,
    pub current_grader: Option<UserId>,
    pub session_id: SessionId,
}

/// Snapshot of the room for an assignment.
pub async fn get_status(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(assignment_id): Path<String>,
) -> Result<Json<Session>, AppError> {
    let assignment_id = AssignmentId::new(assignment_id);
    let session = state.rooms.snapshot(&assignment_id).await?;
    Ok(Json(session))
}

/// Request the grader lock on behalf of the caller.
pub async fn acquire_lock(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<String>,
) -> Result<Json<LockResponse>, AppError> {
    let assignment_id = AssignmentId::new(assignment_id);
    let reply = state
        .rooms
        .acquire_lock(&assignment_id, &user.user_id)
        .await?;

    tracing::debug!(
        assignment_id = %assignment_id,
        user_id = %user.user_id,
        outcome = reply.outcome.as_str(),
        "Lock requested over REST"
    );

    Ok(Json(LockResponse {
        granted: matches!(reply.outcome, LockOutcome::Granted | LockOutcome::AlreadyHeld),
        current_grader: reply.session.current_grader,
        session_id: reply.session.session_id,
    }))
}

/// Release the grader lock held by the caller.
pub async fn release_lock(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<String>,
) -> Result<Json<LockResponse>, AppError> {
    let assignment_id = AssignmentId::new(assignment_id);
    let reply = state
        .rooms
        .release_lock(&assignment_id, &user.user_id)
        .await?;

    Ok(Json(LockResponse {
        granted: reply.outcome == LockOutcome::Released,
        current_grader: reply.session.current_grader,
        session_id: reply.session.session_id,
    }))
}

/// Tear the room down: every socket is closed normally and the session is
/// marked closed.
pub async fn close_room(
    State(state): State<AppState>,
    Professor(user): Professor,
    Path(assignment_id): Path<String>,
) -> Result<Json<Session>, AppError> {
    let assignment_id = AssignmentId::new(assignment_id);
    let session = state
        .rooms
        .close_room(&assignment_id, close_code::NORMAL, "closed by professor")
        .await?;

    tracing::info!(
        assignment_id = %assignment_id,
        session_id = %session.session_id,
        user_id = %user.user_id,
        "Collaboration room closed over REST"
    );

    Ok(Json(session))
}
