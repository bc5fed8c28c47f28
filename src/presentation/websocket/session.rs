//! Per-socket liveness tracking

use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{AssignmentId, ConnectionId, UserId};

/// State of one collaboration socket, owned by its handler task.
#[derive(Debug)]
pub struct SocketSession {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub assignment_id: AssignmentId,
    pub frames_received: u64,
    last_seen: Instant,
    timeout: Duration,
}

impl SocketSession {
    /// `timeout` is how long the peer may stay silent before it is considered
    /// gone.
    pub fn new(
        connection_id: ConnectionId,
        user_id: UserId,
        assignment_id: AssignmentId,
        timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            assignment_id,
            frames_received: 0,
            last_seen: Instant::now(),
            timeout,
        }
    }

    /// Any inbound frame, including pongs, counts as a sign of life.
    pub fn touch(&mut self) {
        self.frames_received += 1;
        self.last_seen = Instant::now();
    }

    pub fn is_alive(&self) -> bool {
        self.last_seen.elapsed() < self.timeout
    }
}

/// Runs a closure when dropped, on every exit path of the owning scope.
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
