//! Lock Coordinator
//!
//! Builds the lock envelopes and evaluates the local grading permission. The
//! coordinator never changes local lock state: the holder is only what the
//! server last broadcast.

use crate::domain::envelope::LockRequest;
use crate::domain::{AssignmentId, Envelope, UserId};

#[derive(Debug, Clone)]
pub struct LockCoordinator {
    assignment_id: AssignmentId,
}

impl LockCoordinator {
    pub fn new(assignment_id: AssignmentId) -> Self {
        Self { assignment_id }
    }

    fn body(&self) -> LockRequest {
        LockRequest {
            assignment_id: self.assignment_id.clone(),
        }
    }

    pub fn request(&self) -> Envelope {
        Envelope::RequestGraderLock(self.body())
    }

    pub fn release(&self) -> Envelope {
        Envelope::ReleaseGraderLock(self.body())
    }

    pub fn query_current(&self) -> Envelope {
        Envelope::RequestCurrentGrader(self.body())
    }
}

/// `connected && (no holder || holder is self)`
pub fn can_grade(connected: bool, current_grader: Option<&UserId>, self_id: Option<&UserId>) -> bool {
    if !connected {
        return false;
    }
    match current_grader {
        None => true,
        Some(holder) => self_id == Some(holder),
    }
}
