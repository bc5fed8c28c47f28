//! Identifier newtypes.
//!
//! All identifiers travel as plain JSON strings on the wire; the newtypes only
//! exist so that an assignment id cannot be passed where a user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifies the assignment a room is bound to. One room per assignment.
    AssignmentId
);

string_id!(
    /// Identifies a platform user (the JWT `sub` claim).
    UserId
);

string_id!(
    /// Identifies one lifetime of a room. A room that closes and is joined again
    /// gets a fresh session id.
    SessionId
);

impl SessionId {
    /// Generate a session id for a newly created room.
    pub fn generate(assignment_id: &AssignmentId) -> Self {
        Self(format!("collab_{}_{}", assignment_id, Uuid::new_v4().simple()))
    }
}

/// Identifies a single socket. One user may hold several sockets in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
