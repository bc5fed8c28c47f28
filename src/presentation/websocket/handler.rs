//! Collaboration Socket Handler
//!
//! One task per socket. Inbound text frames are decoded and forwarded to the
//! room actor; a writer task drains the socket's outbox. The room actor holds
//! the only strong handle to the outbox, so when the room drops a socket the
//! writer ends and the connection is torn down.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;

use super::session::{ScopeGuard, SocketSession};
use crate::application::services::{fault, Outbound, RoomHandle};
use crate::domain::envelope::{close_code, SessionFault};
use crate::domain::{AssignmentId, CollaborationUser, ConnectionId, Envelope, StatusEvent};
use crate::infrastructure::metrics;
use crate::presentation::middleware::AuthUser;
use crate::startup::AppState;

/// WebSocket upgrade handler for `/api/v1/collaboration/{assignment_id}`
pub async fn collaboration_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<String>,
) -> Response {
    let limits = &state.settings.websocket;
    ws.max_message_size(limits.max_message_size)
        .max_frame_size(limits.max_frame_size)
        .on_upgrade(move |socket| {
            handle_socket(socket, state, user, AssignmentId::new(assignment_id))
        })
}

fn close_message(code: u16, reason: impl Into<String>) -> Message {
    let reason: String = reason.into();
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Handle individual collaboration socket
async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    user: AuthUser,
    assignment_id: AssignmentId,
) {
    let connection_id = ConnectionId::generate();

    if !state.settings.collaboration.allows(&user.role) {
        tracing::warn!(
            assignment_id = %assignment_id,
            user_id = %user.user_id,
            role = %user.role,
            "Role not permitted to collaborate, closing"
        );
        let _ = socket
            .send(close_message(
                close_code::POLICY_VIOLATION,
                "role not permitted to collaborate",
            ))
            .await;
        return;
    }

    if state.is_shutting_down() {
        let _ = socket
            .send(close_message(close_code::GOING_AWAY, "server shutting down"))
            .await;
        return;
    }

    let (outbox, mut outbox_rx) =
        mpsc::channel::<Outbound>(state.settings.collaboration.outbox_capacity);
    let participant = CollaborationUser::new(user.user_id.clone(), user.role.clone());

    // Only the room keeps the outbox alive; this task holds a weak handle.
    let weak_outbox = outbox.downgrade();

    let room = match state
        .rooms
        .join(&assignment_id, connection_id, participant, outbox)
        .await
    {
        Ok((room, session)) => {
            tracing::info!(
                assignment_id = %assignment_id,
                session_id = %session.session_id,
                user_id = %user.user_id,
                connection_id = %connection_id,
                "Socket joined room"
            );
            room
        }
        Err(e) => {
            tracing::warn!(
                assignment_id = %assignment_id,
                user_id = %user.user_id,
                error = %e,
                "Failed to join room"
            );
            let _ = socket
                .send(close_message(close_code::GOING_AWAY, e.to_string()))
                .await;
            return;
        }
    };

    metrics::socket_opened();
    let _leave = {
        let room = room.clone();
        ScopeGuard::new(move || {
            room.leave(connection_id);
            metrics::socket_closed();
        })
    };

    // Split socket for concurrent read/write
    let (mut sender, mut receiver) = socket.split();

    // Forward outbox frames to the socket
    let mut sender_task = tokio::spawn(async move {
        while let Some(outbound) = outbox_rx.recv().await {
            let message = match outbound {
                Outbound::Envelope(envelope) => match envelope.encode() {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize envelope");
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Bytes::new()),
                Outbound::Close { code, reason } => {
                    let _ = sender.send(close_message(code, reason)).await;
                    break;
                }
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_every = Duration::from_millis(state.settings.websocket.heartbeat_interval_ms);
    let mut session = SocketSession::new(
        connection_id,
        user.user_id.clone(),
        assignment_id.clone(),
        heartbeat_every * 2,
    );
    let mut heartbeat = interval(heartbeat_every);
    heartbeat.tick().await; // Skip first immediate tick

    // Main message loop
    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.touch();
                        if !forward_text(text.as_str(), &session, &room, &weak_outbox) {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        session.touch();
                        metrics::record_dropped("binary");
                        tracing::debug!(
                            connection_id = %connection_id,
                            "Binary frame dropped"
                        );
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Pong replies are handled automatically by axum
                        session.touch();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(
                            connection_id = %connection_id,
                            code = frame.as_ref().map(|f| f.code),
                            "Peer closed connection"
                        );
                        break;
                    }
                    None => {
                        tracing::debug!(connection_id = %connection_id, "Connection dropped");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if !session.is_alive() {
                    tracing::info!(
                        connection_id = %connection_id,
                        user_id = %session.user_id,
                        "Heartbeat timeout, closing connection"
                    );
                    break;
                }
                if !push(&weak_outbox, Outbound::Ping) {
                    break;
                }
            }

            // Writer finished: the room closed us or the socket is gone
            _ = &mut sender_task => break,
        }
    }

    sender_task.abort();

    tracing::info!(
        assignment_id = %assignment_id,
        user_id = %session.user_id,
        connection_id = %connection_id,
        frames = session.frames_received,
        "Socket disconnected"
    );
}

/// Queue a frame for this socket unless the room has already dropped it.
fn push(outbox: &mpsc::WeakSender<Outbound>, outbound: Outbound) -> bool {
    outbox
        .upgrade()
        .is_some_and(|tx| tx.try_send(outbound).is_ok())
}

/// Decode one text frame and hand it to the room. Returns false when the
/// socket should be closed.
fn forward_text(
    text: &str,
    session: &SocketSession,
    room: &RoomHandle,
    outbox: &mpsc::WeakSender<Outbound>,
) -> bool {
    match Envelope::decode(text) {
        Ok(envelope) => {
            if let Some(target) = envelope.assignment_id() {
                if target != &session.assignment_id {
                    tracing::warn!(
                        assignment_id = %session.assignment_id,
                        target = %target,
                        user_id = %session.user_id,
                        kind = envelope.kind(),
                        "Envelope addressed to another room dropped"
                    );
                    metrics::record_dropped("wrong_room");
                    return true;
                }
            }
            room.submit(session.connection_id, envelope)
        }
        Err(e) => {
            tracing::warn!(
                assignment_id = %session.assignment_id,
                user_id = %session.user_id,
                connection_id = %session.connection_id,
                reason = e.reason(),
                error = %e,
                "Inbound frame dropped"
            );
            metrics::record_dropped(e.reason());

            let reply = StatusEvent::Error(SessionFault::new(fault::INVALID_ENVELOPE, e.to_string()))
                .into_envelope(room.session_id(), &session.assignment_id);
            push(outbox, Outbound::Envelope(reply));
            true
        }
    }
}
