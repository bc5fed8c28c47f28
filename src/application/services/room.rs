//! Room state machine.
//!
//! `Room` is the authoritative state of one collaboration room. It performs no
//! I/O: every operation returns the deliveries the caller must fan out. The
//! room actor in [`super::registry`] owns exactly one `Room` and feeds it
//! commands one at a time, which is what makes lock arbitration atomic.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::config::CollaborationSettings;
use crate::domain::envelope::{
    GraderChanged, GraderInfo, LockReleased, ReleaseReason, SessionClosed, SessionFault, UserLeft,
};
use crate::domain::{
    AssignmentId, CollaborationUser, ConnectionId, Envelope, Session, SessionError, SessionId,
    StatusEvent, UserId,
};
use crate::infrastructure::metrics;

/// Fault codes sent in `error` sub-events.
pub mod fault {
    pub const LOCK_HELD: &str = "lock_held";
    pub const NOT_LOCK_HOLDER: &str = "not_lock_holder";
    pub const NOT_PARTICIPANT: &str = "not_participant";
    pub const INVALID_ENVELOPE: &str = "invalid_envelope";
}

/// Who receives a delivery. Resolved against the room's open sockets at send
/// time, so a socket that already left is never addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    All,
    AllExcept(ConnectionId),
    Only(ConnectionId),
}

impl Recipients {
    pub fn includes(&self, connection: &ConnectionId) -> bool {
        match self {
            Recipients::All => true,
            Recipients::AllExcept(excluded) => excluded != connection,
            Recipients::Only(target) => target == connection,
        }
    }
}

/// One envelope addressed to a set of sockets.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: Recipients,
    pub envelope: Envelope,
}

/// Result of a lock request or release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    /// The requester already held the lock.
    AlreadyHeld,
    Denied { holder: UserId },
    Released,
    NotHolder { holder: Option<UserId> },
    NotParticipant,
}

impl LockOutcome {
    /// Label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockOutcome::Granted => "granted",
            LockOutcome::AlreadyHeld => "already_held",
            LockOutcome::Denied { .. } => "denied",
            LockOutcome::Released => "released",
            LockOutcome::NotHolder { .. } => "not_holder",
            LockOutcome::NotParticipant => "not_participant",
        }
    }
}

/// Policy knobs applied by every room.
#[derive(Debug, Clone, Default)]
pub struct RoomPolicy {
    pub enforce_grader_lock: bool,
    pub lock_idle_timeout: Option<Duration>,
}

impl From<&CollaborationSettings> for RoomPolicy {
    fn from(settings: &CollaborationSettings) -> Self {
        Self {
            enforce_grader_lock: settings.enforce_grader_lock,
            lock_idle_timeout: (settings.lock_idle_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.lock_idle_timeout_secs)),
        }
    }
}

/// Authoritative state of one collaboration room.
pub struct Room {
    session: Session,
    /// Open sockets and the user behind each.
    connections: HashMap<ConnectionId, UserId>,
    policy: RoomPolicy,
    /// Last accepted activity of the current lock holder.
    holder_seen_at: Option<Instant>,
}

impl Room {
    pub fn new(session_id: SessionId, assignment_id: AssignmentId, policy: RoomPolicy) -> Self {
        Self {
            session: Session::new(session_id, assignment_id),
            connections: HashMap::new(),
            policy,
            holder_seen_at: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self) -> Session {
        self.session.clone()
    }

    pub fn policy(&self) -> &RoomPolicy {
        &self.policy
    }

    /// No socket is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_of(&self, connection: &ConnectionId) -> Option<&UserId> {
        self.connections.get(connection)
    }

    fn event(&self, event: StatusEvent) -> Envelope {
        event.into_envelope(&self.session.session_id, &self.session.assignment_id)
    }

    fn deliver(&self, to: Recipients, event: StatusEvent) -> Delivery {
        Delivery {
            to,
            envelope: self.event(event),
        }
    }

    fn fault(&self, connection: ConnectionId, fault: SessionFault) -> Delivery {
        self.deliver(Recipients::Only(connection), StatusEvent::Error(fault))
    }

    /// Register a socket. The socket receives a full `session_joined` snapshot;
    /// everyone else hears `user_joined` if this is the user's first socket.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        user: CollaborationUser,
    ) -> Result<Vec<Delivery>, SessionError> {
        let user_id = user.user_id.clone();
        let first_socket = self.session.add_user(user)?;
        self.connections.insert(connection, user_id.clone());

        let mut deliveries = vec![self.deliver(
            Recipients::Only(connection),
            StatusEvent::SessionJoined(self.snapshot()),
        )];

        if first_socket {
            if let Some(joined) = self.session.user(&user_id).cloned() {
                deliveries.push(self.deliver(
                    Recipients::AllExcept(connection),
                    StatusEvent::UserJoined(joined),
                ));
            }
        }

        tracing::info!(
            session_id = %self.session.session_id,
            user_id = %user_id,
            connection_id = %connection,
            first_socket,
            participants = self.session.active_users.len(),
            "Participant joined room"
        );

        Ok(deliveries)
    }

    /// Unregister a socket. The user leaves presence when their last socket
    /// closes, and releases the lock if they held it.
    pub fn leave(&mut self, connection: &ConnectionId) -> Vec<Delivery> {
        let Some(user_id) = self.connections.remove(connection) else {
            return Vec::new();
        };

        if self.connections.values().any(|u| u == &user_id) {
            self.session.touch();
            return Vec::new();
        }

        let Some(departure) = self.session.remove_user(&user_id) else {
            return Vec::new();
        };

        tracing::info!(
            session_id = %self.session.session_id,
            user_id = %user_id,
            connection_id = %connection,
            released_lock = departure.released_lock,
            "Participant left room"
        );

        let mut deliveries = vec![self.deliver(
            Recipients::All,
            StatusEvent::UserLeft(UserLeft {
                user_id: user_id.clone(),
            }),
        )];

        if departure.released_lock {
            self.holder_seen_at = None;
            deliveries.push(self.deliver(
                Recipients::All,
                StatusEvent::GraderLockReleased(LockReleased {
                    released_by: Some(user_id),
                    reason: ReleaseReason::Disconnected,
                }),
            ));
        }

        deliveries
    }

    /// Apply one envelope sent by `connection`.
    pub fn handle(&mut self, connection: ConnectionId, envelope: Envelope, now: Instant) -> Vec<Delivery> {
        let Some(sender) = self.connections.get(&connection).cloned() else {
            tracing::warn!(
                session_id = %self.session.session_id,
                connection_id = %connection,
                "Envelope from unknown connection dropped"
            );
            return Vec::new();
        };

        match envelope {
            Envelope::GradeUpdate(mut update) => {
                if self.policy.enforce_grader_lock && !self.session.can_grade(&sender) {
                    let mut fault = SessionFault::new(
                        fault::LOCK_HELD,
                        "grade updates require the grader lock",
                    );
                    fault.current_grader = self.session.current_grader.clone();
                    return vec![self.fault(connection, fault)];
                }
                update.assignment_id = self.session.assignment_id.clone();
                update.user_id = Some(sender.clone());
                update.timestamp.get_or_insert_with(Utc::now);
                self.record_activity(&sender, now);
                vec![Delivery {
                    to: Recipients::AllExcept(connection),
                    envelope: Envelope::GradeUpdate(update),
                }]
            }
            Envelope::CriteriaCommentUpdate(mut update) => {
                update.assignment_id = self.session.assignment_id.clone();
                update.user_id = Some(sender.clone());
                update.timestamp.get_or_insert_with(Utc::now);
                self.record_activity(&sender, now);
                vec![Delivery {
                    to: Recipients::AllExcept(connection),
                    envelope: Envelope::CriteriaCommentUpdate(update),
                }]
            }
            Envelope::FileAnnotationUpdate(mut update) => {
                update.assignment_id = self.session.assignment_id.clone();
                update.user_id = Some(sender.clone());
                update.timestamp.get_or_insert_with(Utc::now);
                self.record_activity(&sender, now);
                vec![Delivery {
                    to: Recipients::AllExcept(connection),
                    envelope: Envelope::FileAnnotationUpdate(update),
                }]
            }
            Envelope::RequestGraderLock(_) => self.acquire_lock(&sender, Some(connection), now).1,
            Envelope::ReleaseGraderLock(_) => self.release_lock(&sender, Some(connection)).1,
            Envelope::RequestCurrentGrader(_) => vec![self.deliver(
                Recipients::Only(connection),
                StatusEvent::CurrentGraderInfo(GraderInfo {
                    current_grader: self.session.current_grader.clone(),
                    active_users: self.session.active_users.clone(),
                }),
            )],
            Envelope::SessionStatusUpdate(update) => {
                tracing::warn!(
                    session_id = %self.session.session_id,
                    user_id = %sender,
                    status = %update.status,
                    "Client-originated session status dropped"
                );
                Vec::new()
            }
        }
    }

    fn record_activity(&mut self, user_id: &UserId, now: Instant) {
        self.session.touch();
        if self.session.current_grader.as_ref() == Some(user_id) {
            self.holder_seen_at = Some(now);
        }
    }

    /// First-requester-wins arbitration. `reply_to` receives denials and
    /// re-confirmations; grants are broadcast to the whole room.
    pub fn acquire_lock(
        &mut self,
        user_id: &UserId,
        reply_to: Option<ConnectionId>,
        now: Instant,
    ) -> (LockOutcome, Vec<Delivery>) {
        let (outcome, deliveries) = match self.session.current_grader.clone() {
            None => match self.session.set_grader(user_id) {
                Ok(()) => {
                    self.holder_seen_at = Some(now);
                    let grant = self.deliver(
                        Recipients::All,
                        StatusEvent::CurrentGraderChanged(GraderChanged {
                            current_grader: Some(user_id.clone()),
                        }),
                    );
                    (LockOutcome::Granted, vec![grant])
                }
                Err(_) => {
                    let replies = reply_to
                        .map(|c| {
                            self.fault(
                                c,
                                SessionFault::new(
                                    fault::NOT_PARTICIPANT,
                                    "only room participants may hold the grader lock",
                                ),
                            )
                        })
                        .into_iter()
                        .collect();
                    (LockOutcome::NotParticipant, replies)
                }
            },
            Some(holder) if &holder == user_id => {
                self.holder_seen_at = Some(now);
                let confirm = reply_to
                    .map(|c| {
                        self.deliver(
                            Recipients::Only(c),
                            StatusEvent::CurrentGraderChanged(GraderChanged {
                                current_grader: Some(holder.clone()),
                            }),
                        )
                    })
                    .into_iter()
                    .collect();
                (LockOutcome::AlreadyHeld, confirm)
            }
            Some(holder) => {
                let replies = reply_to
                    .map(|c| {
                        let mut fault = SessionFault::new(
                            fault::LOCK_HELD,
                            format!("grader lock is held by {}", holder),
                        );
                        fault.current_grader = Some(holder.clone());
                        self.fault(c, fault)
                    })
                    .into_iter()
                    .collect();
                (LockOutcome::Denied { holder }, replies)
            }
        };

        tracing::info!(
            session_id = %self.session.session_id,
            user_id = %user_id,
            outcome = outcome.as_str(),
            "Grader lock requested"
        );
        metrics::record_lock(outcome.as_str());

        (outcome, deliveries)
    }

    /// Release the lock if `user_id` holds it.
    pub fn release_lock(
        &mut self,
        user_id: &UserId,
        reply_to: Option<ConnectionId>,
    ) -> (LockOutcome, Vec<Delivery>) {
        let holder = self.session.current_grader.clone();
        let (outcome, deliveries) = if holder.as_ref() == Some(user_id) {
            self.session.clear_grader();
            self.holder_seen_at = None;
            let released = self.deliver(
                Recipients::All,
                StatusEvent::GraderLockReleased(LockReleased {
                    released_by: Some(user_id.clone()),
                    reason: ReleaseReason::Released,
                }),
            );
            (LockOutcome::Released, vec![released])
        } else {
            let replies = reply_to
                .map(|c| {
                    let mut fault =
                        SessionFault::new(fault::NOT_LOCK_HOLDER, "grader lock is not held by you");
                    fault.current_grader = holder.clone();
                    self.fault(c, fault)
                })
                .into_iter()
                .collect();
            (LockOutcome::NotHolder { holder }, replies)
        };

        tracing::info!(
            session_id = %self.session.session_id,
            user_id = %user_id,
            outcome = outcome.as_str(),
            "Grader lock release requested"
        );
        metrics::record_lock(outcome.as_str());

        (outcome, deliveries)
    }

    /// Clear a lock whose holder has been idle past the policy timeout.
    pub fn expire_idle_lock(&mut self, now: Instant) -> Vec<Delivery> {
        let (Some(timeout), Some(seen_at)) = (self.policy.lock_idle_timeout, self.holder_seen_at)
        else {
            return Vec::new();
        };
        if now.saturating_duration_since(seen_at) < timeout {
            return Vec::new();
        }

        let Some(holder) = self.session.clear_grader() else {
            self.holder_seen_at = None;
            return Vec::new();
        };
        self.holder_seen_at = None;

        tracing::info!(
            session_id = %self.session.session_id,
            user_id = %holder,
            idle_secs = timeout.as_secs(),
            "Idle grader lock expired"
        );
        metrics::record_lock("expired");

        vec![self.deliver(
            Recipients::All,
            StatusEvent::GraderLockReleased(LockReleased {
                released_by: Some(holder),
                reason: ReleaseReason::Idle,
            }),
        )]
    }

    /// Close the session. Connections are dropped by the owner afterwards.
    pub fn close(&mut self, reason: &str) -> Vec<Delivery> {
        if !self.session.close() {
            return Vec::new();
        }
        self.holder_seen_at = None;

        tracing::info!(
            session_id = %self.session.session_id,
            reason = %reason,
            "Room closed"
        );

        vec![self.deliver(
            Recipients::All,
            StatusEvent::SessionClosed(SessionClosed {
                reason: reason.to_string(),
            }),
        )]
    }
}
