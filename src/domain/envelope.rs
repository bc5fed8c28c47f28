//! Wire contract of the collaboration channel.
//!
//! Every frame on the duplex connection is a JSON object with a `type`
//! discriminant. `session_status_update` frames carry a second discriminant,
//! `status`, and an untyped `details` object; [`StatusEvent`] is the typed view
//! of those sub-events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entities::{CollaborationUser, Session};
use crate::domain::value_objects::{timestamp, AssignmentId, SessionId, UserId};

/// WebSocket close codes used by the protocol.
pub mod close_code {
    /// Intentional disconnect or explicit room teardown. Never retried.
    pub const NORMAL: u16 = 1000;
    /// Server shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Reserved code reported when a connection drops without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Authenticated user is not allowed to collaborate.
    pub const POLICY_VIOLATION: u16 = 1008;
}

/// A tagged message unit exchanged over the duplex connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    GradeUpdate(GradeUpdate),
    CriteriaCommentUpdate(CriteriaCommentUpdate),
    FileAnnotationUpdate(FileAnnotationUpdate),
    SessionStatusUpdate(SessionStatusUpdate),
    RequestGraderLock(LockRequest),
    ReleaseGraderLock(LockRequest),
    RequestCurrentGrader(LockRequest),
}

impl Envelope {
    /// Every `type` tag this protocol version understands.
    pub const KNOWN_TYPES: [&'static str; 7] = [
        "grade_update",
        "criteria_comment_update",
        "file_annotation_update",
        "session_status_update",
        "request_grader_lock",
        "release_grader_lock",
        "request_current_grader",
    ];

    /// The `type` discriminant, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::GradeUpdate(_) => "grade_update",
            Envelope::CriteriaCommentUpdate(_) => "criteria_comment_update",
            Envelope::FileAnnotationUpdate(_) => "file_annotation_update",
            Envelope::SessionStatusUpdate(_) => "session_status_update",
            Envelope::RequestGraderLock(_) => "request_grader_lock",
            Envelope::ReleaseGraderLock(_) => "release_grader_lock",
            Envelope::RequestCurrentGrader(_) => "request_current_grader",
        }
    }

    pub fn assignment_id(&self) -> Option<&AssignmentId> {
        match self {
            Envelope::GradeUpdate(e) => Some(&e.assignment_id),
            Envelope::CriteriaCommentUpdate(e) => Some(&e.assignment_id),
            Envelope::FileAnnotationUpdate(e) => Some(&e.assignment_id),
            Envelope::SessionStatusUpdate(e) => e.assignment_id.as_ref(),
            Envelope::RequestGraderLock(e)
            | Envelope::ReleaseGraderLock(e)
            | Envelope::RequestCurrentGrader(e) => Some(&e.assignment_id),
        }
    }

    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text).map_err(EnvelopeError::Malformed)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingType)?;

        if !Self::KNOWN_TYPES.contains(&kind) {
            return Err(EnvelopeError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(EnvelopeError::Malformed)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Why an inbound frame could not be turned into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("envelope has no type discriminant")]
    MissingType,

    #[error("unknown envelope type: {0}")]
    UnknownType(String),
}

impl EnvelopeError {
    /// Short label for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            EnvelopeError::Malformed(_) => "malformed",
            EnvelopeError::MissingType => "missing_type",
            EnvelopeError::UnknownType(_) => "unknown_type",
        }
    }
}

/// Scores for a submission, relayed verbatim to other graders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeUpdate {
    pub assignment_id: AssignmentId,

    /// Author, stamped by the server from the authenticated socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// Criterion id to numeric score.
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, f64>,

    #[serde(default)]
    pub total_score: f64,

    #[serde(default)]
    pub feedback: String,

    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaCommentUpdate {
    pub assignment_id: AssignmentId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    pub criteria_id: String,

    #[serde(default)]
    pub comment: String,

    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnnotationUpdate {
    pub assignment_id: AssignmentId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    pub file_id: String,

    /// Opaque annotation payload; never inspected.
    #[serde(default)]
    pub annotation: Value,

    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Session-level notification. `status` selects the sub-event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,

    pub status: String,

    #[serde(default)]
    pub details: Value,

    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SessionStatusUpdate {
    /// `details` of a resync, completed with the envelope-level identifiers
    /// when the sender only put them on the envelope.
    fn snapshot_details(&self) -> Value {
        let mut details = self.details.clone();
        if let Value::Object(fields) = &mut details {
            if let Some(session_id) = &self.session_id {
                fields
                    .entry("session_id")
                    .or_insert_with(|| Value::String(session_id.to_string()));
            }
            if let Some(assignment_id) = &self.assignment_id {
                fields
                    .entry("assignment_id")
                    .or_insert_with(|| Value::String(assignment_id.to_string()));
            }
        }
        details
    }
}

/// Body of `request_grader_lock`, `release_grader_lock` and
/// `request_current_grader`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub assignment_id: AssignmentId,
}

// ---------------------------------------------------------------------------
// Session status sub-events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLeft {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderChanged {
    #[serde(default)]
    pub current_grader: Option<UserId>,
}

/// Why the grader lock was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    #[default]
    Released,
    Disconnected,
    Idle,
    Closed,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Released => "released",
            ReleaseReason::Disconnected => "disconnected",
            ReleaseReason::Idle => "idle",
            ReleaseReason::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockReleased {
    #[serde(default)]
    pub released_by: Option<UserId>,

    #[serde(default)]
    pub reason: ReleaseReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderInfo {
    #[serde(default)]
    pub current_grader: Option<UserId>,

    #[serde(default)]
    pub active_users: Vec<CollaborationUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClosed {
    #[serde(default)]
    pub reason: String,
}

/// Server-reported, non-fatal session error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFault {
    pub error: String,

    /// Machine-readable code, e.g. `lock_held`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_grader: Option<UserId>,
}

impl SessionFault {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
            current_grader: None,
        }
    }
}

/// Typed view of a `session_status_update` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Full resync sent to a socket right after it joins.
    SessionJoined(Session),
    UserJoined(CollaborationUser),
    UserLeft(UserLeft),
    CurrentGraderChanged(GraderChanged),
    GraderLockReleased(LockReleased),
    CurrentGraderInfo(GraderInfo),
    SessionClosed(SessionClosed),
    Error(SessionFault),
}

impl StatusEvent {
    pub const SESSION_JOINED: &'static str = "session_joined";
    pub const USER_JOINED: &'static str = "user_joined";
    pub const USER_LEFT: &'static str = "user_left";
    pub const CURRENT_GRADER_CHANGED: &'static str = "current_grader_changed";
    pub const GRADER_LOCK_RELEASED: &'static str = "grader_lock_released";
    pub const CURRENT_GRADER_INFO: &'static str = "current_grader_info";
    pub const SESSION_CLOSED: &'static str = "session_closed";
    pub const ERROR: &'static str = "error";

    /// The `status` sub-tag.
    pub fn tag(&self) -> &'static str {
        match self {
            StatusEvent::SessionJoined(_) => Self::SESSION_JOINED,
            StatusEvent::UserJoined(_) => Self::USER_JOINED,
            StatusEvent::UserLeft(_) => Self::USER_LEFT,
            StatusEvent::CurrentGraderChanged(_) => Self::CURRENT_GRADER_CHANGED,
            StatusEvent::GraderLockReleased(_) => Self::GRADER_LOCK_RELEASED,
            StatusEvent::CurrentGraderInfo(_) => Self::CURRENT_GRADER_INFO,
            StatusEvent::SessionClosed(_) => Self::SESSION_CLOSED,
            StatusEvent::Error(_) => Self::ERROR,
        }
    }

    fn details(&self) -> Value {
        match self {
            StatusEvent::SessionJoined(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::UserJoined(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::UserLeft(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::CurrentGraderChanged(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::GraderLockReleased(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::CurrentGraderInfo(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::SessionClosed(e) => serde_json::to_value(e).unwrap_or_default(),
            StatusEvent::Error(e) => serde_json::to_value(e).unwrap_or_default(),
        }
    }

    /// Wrap into a `session_status_update` envelope.
    pub fn into_envelope(self, session_id: &SessionId, assignment_id: &AssignmentId) -> Envelope {
        Envelope::SessionStatusUpdate(SessionStatusUpdate {
            session_id: Some(session_id.clone()),
            assignment_id: Some(assignment_id.clone()),
            status: self.tag().to_string(),
            details: self.details(),
            timestamp: Some(Utc::now()),
        })
    }

    /// Interpret a status frame. `Ok(None)` means the sub-tag is not known.
    pub fn decode(update: &SessionStatusUpdate) -> Result<Option<Self>, serde_json::Error> {
        let details = update.details.clone();
        let event = match update.status.as_str() {
            Self::SESSION_JOINED => {
                StatusEvent::SessionJoined(serde_json::from_value(update.snapshot_details())?)
            }
            Self::USER_JOINED => StatusEvent::UserJoined(serde_json::from_value(details)?),
            Self::USER_LEFT => StatusEvent::UserLeft(serde_json::from_value(details)?),
            Self::CURRENT_GRADER_CHANGED => {
                StatusEvent::CurrentGraderChanged(serde_json::from_value(details)?)
            }
            Self::GRADER_LOCK_RELEASED => {
                StatusEvent::GraderLockReleased(serde_json::from_value(details)?)
            }
            Self::CURRENT_GRADER_INFO => {
                StatusEvent::CurrentGraderInfo(serde_json::from_value(details)?)
            }
            Self::SESSION_CLOSED => StatusEvent::SessionClosed(serde_json::from_value(details)?),
            Self::ERROR => StatusEvent::Error(serde_json::from_value(details)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
