//! Room registry and per-room actors.
//!
//! Each live room is owned by one tokio task. Every mutation of a room, from
//! sockets or from REST, is a [`RoomCommand`] on that task's queue, so all
//! state changes of one room are serialized without locks while distinct rooms
//! run concurrently. The registry maps assignment ids to actor handles.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::room::{Delivery, LockOutcome, Room, RoomPolicy};
use crate::domain::{
    AssignmentId, CollaborationUser, ConnectionId, Envelope, Session, SessionError, SessionId,
    UserId,
};
use crate::infrastructure::metrics;

/// Per-socket outbound queue depth. A socket that falls this far behind is
/// disconnected rather than stalling the room.
pub const OUTBOX_CAPACITY: usize = 256;

/// How often an actor checks for an idle grader lock.
const LOCK_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A join that races a closing room retries against a fresh one.
const JOIN_ATTEMPTS: usize = 3;

/// Frames queued for one socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Envelope(Envelope),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("no active collaboration room for assignment {0}")]
    NotFound(AssignmentId),

    #[error("collaboration room is closed")]
    Closed,

    #[error("user {0} is not a participant of this room")]
    NotParticipant(UserId),
}

impl From<SessionError> for RoomError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Closed => RoomError::Closed,
            SessionError::NotAParticipant(user_id) => RoomError::NotParticipant(user_id),
        }
    }
}

/// Answer to a lock request or release made outside a socket.
#[derive(Debug, Clone)]
pub struct LockReply {
    pub outcome: LockOutcome,
    pub session: Session,
}

enum RoomCommand {
    Join {
        connection: ConnectionId,
        user: CollaborationUser,
        outbox: mpsc::Sender<Outbound>,
        reply: oneshot::Sender<Result<Session, RoomError>>,
    },
    Leave {
        connection: ConnectionId,
    },
    Inbound {
        connection: ConnectionId,
        envelope: Envelope,
    },
    AcquireLock {
        user_id: UserId,
        reply: oneshot::Sender<LockReply>,
    },
    ReleaseLock {
        user_id: UserId,
        reply: oneshot::Sender<LockReply>,
    },
    Snapshot {
        reply: oneshot::Sender<Session>,
    },
    Close {
        code: u16,
        reason: String,
        reply: oneshot::Sender<Session>,
    },
}

/// Cloneable address of a room actor.
#[derive(Clone)]
pub struct RoomHandle {
    session_id: SessionId,
    assignment_id: AssignmentId,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn assignment_id(&self) -> &AssignmentId {
        &self.assignment_id
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub async fn join(
        &self,
        connection: ConnectionId,
        user: CollaborationUser,
        outbox: mpsc::Sender<Outbound>,
    ) -> Result<Session, RoomError> {
        self.request(|reply| RoomCommand::Join {
            connection,
            user,
            outbox,
            reply,
        })
        .await?
    }

    /// Fire-and-forget; safe to call from `Drop`.
    pub fn leave(&self, connection: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Leave { connection });
    }

    /// Queue an inbound envelope. Returns false if the room is gone.
    pub fn submit(&self, connection: ConnectionId, envelope: Envelope) -> bool {
        self.tx
            .send(RoomCommand::Inbound {
                connection,
                envelope,
            })
            .is_ok()
    }

    pub async fn acquire_lock(&self, user_id: UserId) -> Result<LockReply, RoomError> {
        self.request(|reply| RoomCommand::AcquireLock { user_id, reply })
            .await
    }

    pub async fn release_lock(&self, user_id: UserId) -> Result<LockReply, RoomError> {
        self.request(|reply| RoomCommand::ReleaseLock { user_id, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<Session, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<Session, RoomError> {
        let reason = reason.into();
        self.request(|reply| RoomCommand::Close {
            code,
            reason,
            reply,
        })
        .await
    }
}

/// Live rooms keyed by assignment.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<AssignmentId, RoomHandle>>,
    policy: RoomPolicy,
}

impl RoomRegistry {
    pub fn new(policy: RoomPolicy) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            policy,
        }
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get(&self, assignment_id: &AssignmentId) -> Option<RoomHandle> {
        self.rooms
            .get(assignment_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    fn require(&self, assignment_id: &AssignmentId) -> Result<RoomHandle, RoomError> {
        self.get(assignment_id)
            .ok_or_else(|| RoomError::NotFound(assignment_id.clone()))
    }

    fn spawn(&self, assignment_id: AssignmentId) -> RoomHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = SessionId::generate(&assignment_id);
        let handle = RoomHandle {
            session_id: session_id.clone(),
            assignment_id: assignment_id.clone(),
            tx,
        };

        let actor = RoomActor {
            room: Room::new(session_id, assignment_id, self.policy.clone()),
            outboxes: Default::default(),
            rx,
            rooms: self.rooms.clone(),
        };
        tokio::spawn(actor.run());

        handle
    }

    fn forget(&self, handle: &RoomHandle) {
        self.rooms
            .remove_if(&handle.assignment_id, |_, current| {
                current.session_id == handle.session_id
            });
    }

    /// Join the room for `assignment_id`, creating it if none is live.
    ///
    /// The joining socket receives the `session_joined` snapshot through
    /// `outbox` before this returns.
    pub async fn join(
        &self,
        assignment_id: &AssignmentId,
        connection: ConnectionId,
        user: CollaborationUser,
        outbox: mpsc::Sender<Outbound>,
    ) -> Result<(RoomHandle, Session), RoomError> {
        for _ in 0..JOIN_ATTEMPTS {
            let handle = self
                .rooms
                .entry(assignment_id.clone())
                .or_insert_with(|| self.spawn(assignment_id.clone()))
                .clone();

            match handle.join(connection, user.clone(), outbox.clone()).await {
                Ok(session) => return Ok((handle, session)),
                Err(RoomError::Closed) => {
                    tracing::debug!(
                        assignment_id = %assignment_id,
                        session_id = %handle.session_id,
                        "Join raced a closing room, retrying"
                    );
                    self.forget(&handle);
                }
                Err(e) => return Err(e),
            }
        }
        Err(RoomError::Closed)
    }

    pub async fn snapshot(&self, assignment_id: &AssignmentId) -> Result<Session, RoomError> {
        let handle = self.require(assignment_id)?;
        handle.snapshot().await.map_err(|e| match e {
            RoomError::Closed => RoomError::NotFound(assignment_id.clone()),
            other => other,
        })
    }

    pub async fn acquire_lock(
        &self,
        assignment_id: &AssignmentId,
        user_id: &UserId,
    ) -> Result<LockReply, RoomError> {
        let reply = self.require(assignment_id)?.acquire_lock(user_id.clone()).await?;
        match reply.outcome {
            LockOutcome::NotParticipant => Err(RoomError::NotParticipant(user_id.clone())),
            _ => Ok(reply),
        }
    }

    pub async fn release_lock(
        &self,
        assignment_id: &AssignmentId,
        user_id: &UserId,
    ) -> Result<LockReply, RoomError> {
        let handle = self.require(assignment_id)?;
        let reply = handle.release_lock(user_id.clone()).await?;
        if !reply.session.contains(user_id) {
            return Err(RoomError::NotParticipant(user_id.clone()));
        }
        Ok(reply)
    }

    /// Close one room: broadcast `session_closed`, close every socket with
    /// `code`, and drop the room.
    pub async fn close_room(
        &self,
        assignment_id: &AssignmentId,
        code: u16,
        reason: &str,
    ) -> Result<Session, RoomError> {
        let handle = self.require(assignment_id)?;
        let session = handle.close(code, reason).await?;
        self.forget(&handle);
        Ok(session)
    }

    /// Close every live room. Returns how many were closed.
    pub async fn close_all(&self, code: u16, reason: &str) -> usize {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut closed = 0;
        for handle in handles {
            if handle.close(code, reason).await.is_ok() {
                closed += 1;
            }
            self.forget(&handle);
        }
        closed
    }
}

enum Flow {
    Continue,
    Stop,
}

struct RoomActor {
    room: Room,
    outboxes: std::collections::HashMap<ConnectionId, mpsc::Sender<Outbound>>,
    rx: mpsc::UnboundedReceiver<RoomCommand>,
    rooms: Arc<DashMap<AssignmentId, RoomHandle>>,
}

impl RoomActor {
    async fn run(mut self) {
        metrics::room_opened();
        tracing::info!(
            session_id = %self.room.session().session_id,
            assignment_id = %self.room.session().assignment_id,
            "Room opened"
        );

        let sweeps_locks = self.room.policy().lock_idle_timeout.is_some();
        let mut sweep = interval(LOCK_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    if let Flow::Stop = self.apply(command) {
                        break;
                    }
                }
                _ = sweep.tick(), if sweeps_locks => {
                    let deliveries = self.room.expire_idle_lock(Instant::now());
                    self.dispatch(deliveries);
                    if let Flow::Stop = self.flow() {
                        break;
                    }
                }
            }
        }

        self.room.close("empty");
        let session_id = self.room.session().session_id.clone();
        self.rooms
            .remove_if(&self.room.session().assignment_id, |_, current| {
                current.session_id == session_id
            });
        metrics::room_closed();

        tracing::info!(session_id = %session_id, "Room stopped");
    }

    fn apply(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join {
                connection,
                user,
                outbox,
                reply,
            } => match self.room.join(connection, user) {
                Ok(deliveries) => {
                    self.outboxes.insert(connection, outbox);
                    self.dispatch(deliveries);
                    let _ = reply.send(Ok(self.room.snapshot()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            },
            RoomCommand::Leave { connection } => self.disconnect(connection),
            RoomCommand::Inbound {
                connection,
                envelope,
            } => {
                let deliveries = self.room.handle(connection, envelope, Instant::now());
                self.dispatch(deliveries);
            }
            RoomCommand::AcquireLock { user_id, reply } => {
                let (outcome, deliveries) = self.room.acquire_lock(&user_id, None, Instant::now());
                self.dispatch(deliveries);
                let _ = reply.send(LockReply {
                    outcome,
                    session: self.room.snapshot(),
                });
            }
            RoomCommand::ReleaseLock { user_id, reply } => {
                let (outcome, deliveries) = self.room.release_lock(&user_id, None);
                self.dispatch(deliveries);
                let _ = reply.send(LockReply {
                    outcome,
                    session: self.room.snapshot(),
                });
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot());
            }
            RoomCommand::Close {
                code,
                reason,
                reply,
            } => {
                let deliveries = self.room.close(&reason);
                self.dispatch(deliveries);
                for (_, outbox) in self.outboxes.drain() {
                    let _ = outbox.try_send(Outbound::Close {
                        code,
                        reason: reason.clone(),
                    });
                }
                let _ = reply.send(self.room.snapshot());
                return Flow::Stop;
            }
        }

        self.flow()
    }

    /// The room lives as long as someone is in it. Dispatch may drop stalled
    /// sockets, so this is checked after every fan-out.
    fn flow(&self) -> Flow {
        if self.room.is_empty() && self.room.session().is_active() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        self.outboxes.remove(&connection);
        let deliveries = self.room.leave(&connection);
        self.dispatch(deliveries);
    }

    /// Fan deliveries out to outboxes. A socket whose outbox is full or closed
    /// is removed from the room.
    fn dispatch(&mut self, deliveries: Vec<Delivery>) {
        let mut stalled = Vec::new();

        for delivery in deliveries {
            let mut sent = 0;
            for (connection, outbox) in &self.outboxes {
                if !delivery.to.includes(connection) {
                    continue;
                }
                match outbox.try_send(Outbound::Envelope(delivery.envelope.clone())) {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %self.room.session().session_id,
                            connection_id = %connection,
                            error = %e,
                            "Outbox unavailable, dropping socket"
                        );
                        metrics::record_dropped("outbox_full");
                        stalled.push(*connection);
                    }
                }
            }
            metrics::record_relay(delivery.envelope.kind(), sent);
        }

        stalled.dedup();
        for connection in stalled {
            if self.outboxes.contains_key(&connection) {
                self.disconnect(connection);
            }
        }
    }
}
