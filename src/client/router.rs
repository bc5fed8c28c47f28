//! Message Router
//!
//! Decodes inbound frames and dispatches them by `type` tag, strictly in
//! arrival order. Frames that cannot be decoded, or that only servers should
//! receive, are dropped and logged; they never affect the connection.

use crate::domain::envelope::{
    CriteriaCommentUpdate, FileAnnotationUpdate, GradeUpdate, SessionStatusUpdate,
};
use crate::domain::{AssignmentId, Envelope};
use crate::infrastructure::metrics;

/// Typed callbacks for the four server-to-client envelope kinds.
pub trait EnvelopeHandler {
    fn on_grade_update(&mut self, _update: GradeUpdate) {}

    fn on_criteria_comment_update(&mut self, _update: CriteriaCommentUpdate) {}

    fn on_file_annotation_update(&mut self, _update: FileAnnotationUpdate) {}

    fn on_session_status_update(&mut self, _update: SessionStatusUpdate) {}
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Dispatched(&'static str),
    Dropped(&'static str),
}

pub struct MessageRouter {
    assignment_id: AssignmentId,
}

impl MessageRouter {
    pub fn new(assignment_id: AssignmentId) -> Self {
        Self { assignment_id }
    }

    pub fn route<H: EnvelopeHandler + ?Sized>(&self, text: &str, handler: &mut H) -> Routed {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    assignment_id = %self.assignment_id,
                    reason = e.reason(),
                    error = %e,
                    "Inbound envelope dropped"
                );
                metrics::record_dropped(e.reason());
                return Routed::Dropped(e.reason());
            }
        };

        let kind = envelope.kind();
        match envelope {
            Envelope::GradeUpdate(update) => handler.on_grade_update(update),
            Envelope::CriteriaCommentUpdate(update) => handler.on_criteria_comment_update(update),
            Envelope::FileAnnotationUpdate(update) => handler.on_file_annotation_update(update),
            Envelope::SessionStatusUpdate(update) => handler.on_session_status_update(update),
            Envelope::RequestGraderLock(_)
            | Envelope::ReleaseGraderLock(_)
            | Envelope::RequestCurrentGrader(_) => {
                tracing::warn!(
                    assignment_id = %self.assignment_id,
                    kind,
                    "Server-bound envelope received by client, dropped"
                );
                metrics::record_dropped("unexpected_type");
                return Routed::Dropped("unexpected_type");
            }
        }

        tracing::trace!(assignment_id = %self.assignment_id, kind, "Envelope dispatched");
        Routed::Dispatched(kind)
    }
}
