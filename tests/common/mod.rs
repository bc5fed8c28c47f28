//! Common Test Utilities
//!
//! Settings, tokens, a server bound to an ephemeral port and a thin
//! WebSocket client for driving it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum_test::TestServer;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    Message,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use grading_collab::application::services::Outbound;
use grading_collab::config::{
    CollaborationSettings, CorsSettings, JwtSettings, ServerSettings, Settings, WebSocketSettings,
};
use grading_collab::domain::{AssignmentId, CollaborationUser, ConnectionId, Role, UserId};
use grading_collab::presentation::http::create_router;
use grading_collab::presentation::middleware::issue_token;
use grading_collab::startup::{AppState, Application};

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

const WAIT: Duration = Duration::from_secs(5);

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        jwt: JwtSettings {
            secret: JWT_SECRET.into(),
        },
        cors: CorsSettings {
            allowed_origins: vec![],
        },
        websocket: WebSocketSettings {
            max_message_size: 65536,
            max_frame_size: 16384,
            heartbeat_interval_ms: 30_000,
        },
        collaboration: CollaborationSettings::default(),
        environment: "test".into(),
    }
}

pub fn token(user: &str, role: Role) -> String {
    issue_token(JWT_SECRET, &UserId::new(user), role, 3600).unwrap()
}

/// In-process router driven through axum-test.
pub fn test_server() -> (TestServer, AppState) {
    let state = AppState::new(test_settings());
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (server, state)
}

/// A participant joined directly through the registry, without a socket.
/// Keep it alive for as long as the user should stay in the room.
pub struct Participant {
    pub connection: ConnectionId,
    pub outbox: mpsc::Receiver<Outbound>,
}

pub async fn join_directly(state: &AppState, assignment: &str, user: &str) -> Participant {
    let (tx, outbox) = mpsc::channel(64);
    let connection = ConnectionId::generate();
    state
        .rooms
        .join(
            &AssignmentId::new(assignment),
            connection,
            CollaborationUser::new(UserId::new(user), Role::Ta),
            tx,
        )
        .await
        .unwrap();
    Participant { connection, outbox }
}

/// Server bound to an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    stop: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_settings()).await
    }

    pub async fn spawn_with(settings: Settings) -> Self {
        let app = Application::build(settings).await.unwrap();
        let addr = app.local_addr().unwrap();
        let state = app.state();
        let (stop, stopped) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            app.run_until(async move {
                let _ = stopped.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            stop: Some(stop),
            server,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, assignment: &str) -> String {
        format!("ws://{}/api/v1/collaboration/{}", self.addr, assignment)
    }

    /// Open a socket and consume its `session_joined` welcome.
    pub async fn join(&self, assignment: &str, user: &str, role: Role) -> TestSocket {
        let mut socket = self.connect(assignment, &token(user, role)).await.unwrap();
        socket.expect_status("session_joined").await;
        socket
    }

    pub async fn connect(
        &self,
        assignment: &str,
        token: &str,
    ) -> Result<TestSocket, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.ws_url(assignment).into_client_request()?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(TestSocket { stream })
    }

    /// Trigger graceful shutdown and wait for the server to stop.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = tokio::time::timeout(WAIT, &mut self.server).await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub struct TestSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// What the next meaningful frame was.
#[derive(Debug)]
pub enum Received {
    Envelope(Value),
    Closed(Option<u16>),
}

impl TestSocket {
    pub async fn send_json(&mut self, value: Value) {
        self.stream
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Next text envelope or close, skipping control frames.
    pub async fn receive(&mut self) -> Received {
        let next = tokio::time::timeout(WAIT, async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Received::Envelope(serde_json::from_str(text.as_str()).unwrap())
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Received::Closed(frame.map(|f| u16::from(f.code)))
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return Received::Closed(None),
                }
            }
        })
        .await;
        next.expect("no frame received in time")
    }

    pub async fn next_envelope(&mut self) -> Value {
        match self.receive().await {
            Received::Envelope(value) => value,
            Received::Closed(code) => panic!("socket closed ({code:?}) while waiting for envelope"),
        }
    }

    /// Skip frames until a `session_status_update` with the given sub-tag.
    pub async fn expect_status(&mut self, status: &str) -> Value {
        loop {
            let envelope = self.next_envelope().await;
            if envelope["type"] == "session_status_update" && envelope["status"] == status {
                return envelope;
            }
        }
    }

    /// Skip envelopes until the socket closes, returning the close code.
    pub async fn expect_close(&mut self) -> Option<u16> {
        loop {
            if let Received::Closed(code) = self.receive().await {
                return code;
            }
        }
    }

    /// Assert nothing but control frames arrives for a short while.
    pub async fn expect_silence(&mut self) {
        let quiet = tokio::time::timeout(Duration::from_millis(300), async {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        if let Ok(Some(text)) = quiet {
            panic!("unexpected frame: {text}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }

    /// Drop the TCP connection without a close handshake.
    pub fn abort(self) {
        drop(self.stream);
    }
}
