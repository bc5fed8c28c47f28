//! Collaboration session entity.
//!
//! A `Session` is one live lifetime of a room bound to an assignment. It is
//! never persisted: it is created when the first participant joins and closed
//! when the last one leaves or the room is torn down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{timestamp, AssignmentId, Role, SessionId, UserId};

/// Lifecycle status of a session.
///
/// `Inactive -> Active` on first join, `Active -> Closed` on teardown.
/// `Closed` is terminal for the session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Inactive,
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant currently present in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationUser {
    pub user_id: UserId,

    #[serde(default)]
    pub role: Role,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize_or_now")]
    pub joined_at: DateTime<Utc>,
}

impl CollaborationUser {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            joined_at: Utc::now(),
        }
    }
}

/// Errors raised by session invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("user {0} is not a participant of this session")]
    NotAParticipant(UserId),

    #[error("session is closed")]
    Closed,
}

/// Result of removing a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub user: CollaborationUser,
    /// True when the departing user held the grader lock, which is now cleared.
    pub released_lock: bool,
}

/// Snapshot of one collaboration room.
///
/// Invariants maintained by the methods below:
/// - `active_users` holds each `user_id` at most once
/// - `current_grader`, when set, names a member of `active_users`
/// - a closed session accepts no participants and holds no lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,

    pub assignment_id: AssignmentId,

    #[serde(default)]
    pub status: SessionStatus,

    #[serde(default)]
    pub active_users: Vec<CollaborationUser>,

    #[serde(default)]
    pub current_grader: Option<UserId>,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize_or_now")]
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create an empty, inactive session.
    pub fn new(session_id: SessionId, assignment_id: AssignmentId) -> Self {
        Self {
            session_id,
            assignment_id,
            status: SessionStatus::Inactive,
            active_users: Vec::new(),
            current_grader: None,
            last_activity: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }

    pub fn is_empty(&self) -> bool {
        self.active_users.is_empty()
    }

    /// Check whether a user is present.
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.active_users.iter().any(|u| &u.user_id == user_id)
    }

    pub fn user(&self, user_id: &UserId) -> Option<&CollaborationUser> {
        self.active_users.iter().find(|u| &u.user_id == user_id)
    }

    /// Record activity.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Add a participant. Returns `Ok(false)` if the user was already present.
    ///
    /// The first join moves an inactive session to `Active`.
    pub fn add_user(&mut self, user: CollaborationUser) -> Result<bool, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        if self.contains(&user.user_id) {
            return Ok(false);
        }

        self.active_users.push(user);
        self.status = SessionStatus::Active;
        self.touch();
        Ok(true)
    }

    /// Remove a participant, clearing the grader lock if they held it.
    pub fn remove_user(&mut self, user_id: &UserId) -> Option<Departure> {
        let index = self.active_users.iter().position(|u| &u.user_id == user_id)?;
        let user = self.active_users.swap_remove(index);

        let released_lock = self.current_grader.as_ref() == Some(user_id);
        if released_lock {
            self.current_grader = None;
        }
        self.touch();

        Some(Departure {
            user,
            released_lock,
        })
    }

    /// Hand the grader lock to a participant.
    pub fn set_grader(&mut self, user_id: &UserId) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        if !self.contains(user_id) {
            return Err(SessionError::NotAParticipant(user_id.clone()));
        }

        self.current_grader = Some(user_id.clone());
        self.touch();
        Ok(())
    }

    /// Clear the grader lock, returning the previous holder.
    pub fn clear_grader(&mut self) -> Option<UserId> {
        let previous = self.current_grader.take();
        if previous.is_some() {
            self.touch();
        }
        previous
    }

    /// Whether `user_id` may submit grade mutations right now.
    pub fn can_grade(&self, user_id: &UserId) -> bool {
        match &self.current_grader {
            None => true,
            Some(holder) => holder == user_id,
        }
    }

    /// Close the session. Terminal; releases the lock.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.status = SessionStatus::Closed;
        self.current_grader = None;
        self.touch();
        true
    }
}
