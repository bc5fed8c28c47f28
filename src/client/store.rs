//! Session State Store
//!
//! Client-local projection of the room. Only server-sent `session_status_update`
//! sub-events mutate it, and each one is applied idempotently so duplicate
//! delivery after a reconnect is harmless.

use crate::domain::envelope::{SessionFault, SessionStatusUpdate};
use crate::domain::{CollaborationUser, Session, SessionStatus, StatusEvent, UserId};

/// Effect of one applied sub-event.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Resynced,
    UserJoined(UserId),
    UserLeft(UserId),
    GraderChanged(Option<UserId>),
    SessionClosed,
    /// Server-reported error; state untouched.
    Fault(SessionFault),
    /// Nothing changed (duplicate, unknown sub-tag or no session yet).
    Unchanged,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    session: Option<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn current_grader(&self) -> Option<&UserId> {
        self.session.as_ref().and_then(|s| s.current_grader.as_ref())
    }

    pub fn active_users(&self) -> &[CollaborationUser] {
        self.session
            .as_ref()
            .map(|s| s.active_users.as_slice())
            .unwrap_or_default()
    }

    /// Forget everything: no session, no participants, no holder.
    pub fn reset(&mut self) {
        self.session = None;
    }

    /// Decode and apply a status frame, returning the typed event when the
    /// sub-tag is known.
    pub fn apply_update(&mut self, update: &SessionStatusUpdate) -> Option<StatusEvent> {
        match StatusEvent::decode(update) {
            Ok(Some(event)) => {
                let change = self.apply(event.clone());
                tracing::trace!(status = %update.status, ?change, "Session status applied");
                Some(event)
            }
            Ok(None) => {
                tracing::debug!(status = %update.status, "Unknown session status ignored");
                None
            }
            Err(e) => {
                tracing::warn!(
                    status = %update.status,
                    error = %e,
                    "Malformed session status details ignored"
                );
                None
            }
        }
    }

    pub fn apply(&mut self, event: StatusEvent) -> StoreChange {
        if let StatusEvent::SessionJoined(mut session) = event {
            session.status = SessionStatus::Active;
            self.session = Some(session);
            return StoreChange::Resynced;
        }
        if let StatusEvent::Error(fault) = event {
            return StoreChange::Fault(fault);
        }

        // Deltas only make sense on top of a snapshot.
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(status = event.tag(), "Status delta before session_joined ignored");
            return StoreChange::Unchanged;
        };

        match event {
            StatusEvent::UserJoined(user) => {
                let user_id = user.user_id.clone();
                match session.add_user(user) {
                    Ok(true) => StoreChange::UserJoined(user_id),
                    _ => StoreChange::Unchanged,
                }
            }
            StatusEvent::UserLeft(left) => match session.remove_user(&left.user_id) {
                Some(_) => StoreChange::UserLeft(left.user_id),
                None => StoreChange::Unchanged,
            },
            StatusEvent::CurrentGraderChanged(changed) => {
                if session.current_grader == changed.current_grader {
                    return StoreChange::Unchanged;
                }
                session.current_grader = changed.current_grader.clone();
                session.touch();
                StoreChange::GraderChanged(changed.current_grader)
            }
            StatusEvent::GraderLockReleased(_) => match session.clear_grader() {
                Some(_) => StoreChange::GraderChanged(None),
                None => StoreChange::Unchanged,
            },
            StatusEvent::CurrentGraderInfo(info) => {
                session.active_users = info.active_users;
                let changed = session.current_grader != info.current_grader;
                session.current_grader = info.current_grader.clone();
                if changed {
                    StoreChange::GraderChanged(info.current_grader)
                } else {
                    StoreChange::Resynced
                }
            }
            StatusEvent::SessionClosed(_) => {
                if session.close() {
                    StoreChange::SessionClosed
                } else {
                    StoreChange::Unchanged
                }
            }
            StatusEvent::SessionJoined(_) | StatusEvent::Error(_) => StoreChange::Unchanged,
        }
    }
}
