//! Connection Manager
//!
//! Keeps at most one live duplex connection per assignment. A single driver
//! task owns the transport, the session store and the reconnect timer, so
//! every inbound frame, command and timer firing is handled strictly one at a
//! time. [`CollaborationClient`] is the cloneable handle callers use; the
//! driver stops once every handle is dropped.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -(abnormal close)-> Reconnecting -> Connecting
//!                                          Reconnecting -(ceiling)-> Disconnected
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use super::error::{ClientError, ConnectionError};
use super::lock::{self, LockCoordinator};
use super::router::{EnvelopeHandler, MessageRouter};
use super::status::StatusClient;
use super::store::SessionStore;
use super::transport::{Connector, Credential, CredentialProvider, Frame, Transport, WsConnector};
use crate::domain::envelope::{
    close_code, CriteriaCommentUpdate, FileAnnotationUpdate, GradeUpdate, SessionStatusUpdate,
};
use crate::domain::{AssignmentId, Envelope, Session, StatusEvent, UserId};
use crate::infrastructure::metrics;

const EVENT_CAPACITY: usize = 256;

/// Upper bound on any single reconnect wait, whatever the configured cap.
const RECONNECT_DELAY_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry scheduled while the counter reads `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis).min(RECONNECT_DELAY_CEILING)
    }
}

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server base URL, `http(s)://` or `ws(s)://`.
    pub server_url: String,
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            connect_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Split the base URL into its secure flag and `host[:port][/prefix]`.
    fn authority(&self) -> Result<(bool, &str), ClientError> {
        let base = self.server_url.trim_end_matches('/');
        for (scheme, secure) in [
            ("https://", true),
            ("wss://", true),
            ("http://", false),
            ("ws://", false),
        ] {
            if let Some(rest) = base.strip_prefix(scheme) {
                if rest.is_empty() {
                    break;
                }
                return Ok((secure, rest));
            }
        }
        Err(ClientError::InvalidUrl(self.server_url.clone()))
    }

    /// Duplex endpoint for an assignment.
    pub fn socket_url(&self, assignment_id: &AssignmentId) -> Result<String, ClientError> {
        let (secure, rest) = self.authority()?;
        let scheme = if secure { "wss" } else { "ws" };
        Ok(format!(
            "{scheme}://{rest}/api/v1/collaboration/{assignment_id}"
        ))
    }

    /// Request/response base URL.
    pub fn http_url(&self) -> Result<String, ClientError> {
        let (secure, rest) = self.authority()?;
        let scheme = if secure { "https" } else { "http" };
        Ok(format!("{scheme}://{rest}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable snapshot of the client, republished after every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientView {
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful connect.
    pub attempt: u32,
    /// Terminal failure, cleared by the next `connect` or `disconnect`.
    pub error: Option<ConnectionError>,
    pub session: Option<Session>,
    pub self_id: Option<UserId>,
}

impl ClientView {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn current_grader(&self) -> Option<&UserId> {
        self.session.as_ref().and_then(|s| s.current_grader.as_ref())
    }

    pub fn can_grade(&self) -> bool {
        lock::can_grade(
            self.is_connected(),
            self.current_grader(),
            self.self_id.as_ref(),
        )
    }
}

/// Inbound traffic and connection transitions, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    GradeUpdate(GradeUpdate),
    CriteriaCommentUpdate(CriteriaCommentUpdate),
    FileAnnotationUpdate(FileAnnotationUpdate),
    Status(StatusEvent),
    Connection(ConnectionState),
    Failed(ConnectionError),
}

enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
    },
}

/// Handle to a collaboration connection for one assignment.
#[derive(Clone)]
pub struct CollaborationClient {
    assignment_id: AssignmentId,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ClientView>,
    events: broadcast::Sender<ClientEvent>,
    lock: LockCoordinator,
    status: StatusClient,
    credentials: Arc<dyn CredentialProvider>,
}

impl CollaborationClient {
    /// Client over tokio-tungstenite. Must be called inside a tokio runtime.
    pub fn new(
        config: ClientConfig,
        assignment_id: AssignmentId,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ClientError> {
        Self::with_connector(config, assignment_id, credentials, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: ClientConfig,
        assignment_id: AssignmentId,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let url = config.socket_url(&assignment_id)?;
        let status = StatusClient::new(config.http_url()?);

        let (commands, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(ClientView::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let driver = Driver {
            url,
            assignment_id: assignment_id.clone(),
            policy: config.reconnect.clone(),
            connect_timeout: config.connect_timeout(),
            connector,
            credentials: credentials.clone(),
            router: MessageRouter::new(assignment_id.clone()),
            store: SessionStore::new(),
            link: Link::Disconnected,
            attempt: 0,
            error: None,
            self_id: None,
            published: ConnectionState::Disconnected,
            commands: rx,
            view: view_tx,
            events: events.clone(),
        };
        tokio::spawn(driver.run());

        Ok(Self {
            lock: LockCoordinator::new(assignment_id.clone()),
            assignment_id,
            commands,
            view,
            events,
            status,
            credentials,
        })
    }

    pub fn assignment_id(&self) -> &AssignmentId {
        &self.assignment_id
    }

    /// Start connecting. A no-op while connecting or connected. Fails without
    /// any network I/O when no credential is available.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Close normally, cancel any pending retry and forget the session.
    /// Safe to call from any state, any number of times.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, envelope: Envelope) -> bool {
        if !self.is_connected() {
            tracing::debug!(
                assignment_id = %self.assignment_id,
                kind = envelope.kind(),
                "Not connected, envelope not sent"
            );
            return false;
        }
        self.commands.send(Command::Send { envelope }).is_ok()
    }

    /// Ask for the grader lock. Nothing changes locally until the server
    /// broadcasts the new holder.
    pub fn request_grader_lock(&self) -> bool {
        self.send(self.lock.request())
    }

    pub fn release_grader_lock(&self) -> bool {
        self.send(self.lock.release())
    }

    pub fn request_current_grader(&self) -> bool {
        self.send(self.lock.query_current())
    }

    pub fn send_grade_update(
        &self,
        criteria_scores: BTreeMap<String, f64>,
        total_score: f64,
        feedback: impl Into<String>,
    ) -> bool {
        self.send(Envelope::GradeUpdate(GradeUpdate {
            assignment_id: self.assignment_id.clone(),
            user_id: None,
            criteria_scores,
            total_score,
            feedback: feedback.into(),
            timestamp: Some(Utc::now()),
        }))
    }

    pub fn send_criteria_comment_update(
        &self,
        criteria_id: impl Into<String>,
        comment: impl Into<String>,
    ) -> bool {
        self.send(Envelope::CriteriaCommentUpdate(CriteriaCommentUpdate {
            assignment_id: self.assignment_id.clone(),
            user_id: None,
            criteria_id: criteria_id.into(),
            comment: comment.into(),
            timestamp: Some(Utc::now()),
        }))
    }

    pub fn send_file_annotation_update(&self, file_id: impl Into<String>, annotation: Value) -> bool {
        self.send(Envelope::FileAnnotationUpdate(FileAnnotationUpdate {
            assignment_id: self.assignment_id.clone(),
            user_id: None,
            file_id: file_id.into(),
            annotation,
            timestamp: Some(Utc::now()),
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.view.borrow().is_connected()
    }

    pub fn can_grade(&self) -> bool {
        self.view.borrow().can_grade()
    }

    pub fn state(&self) -> ConnectionState {
        self.view.borrow().state
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.view.borrow().error.clone()
    }

    pub fn view(&self) -> ClientView {
        self.view.borrow().clone()
    }

    /// Follow view changes.
    pub fn watch(&self) -> watch::Receiver<ClientView> {
        self.view.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Point-in-time snapshot over request/response, independent of the
    /// socket. `Ok(None)` when the server has no room for the assignment.
    pub async fn session_status(&self) -> Result<Option<Session>, ClientError> {
        let credential = usable(self.credentials.credential()).ok_or(ClientError::MissingCredential)?;
        self.status
            .fetch(&self.assignment_id, &credential.token)
            .await
    }
}

impl fmt::Debug for CollaborationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaborationClient")
            .field("assignment_id", &self.assignment_id)
            .field("state", &self.state())
            .finish()
    }
}

fn usable(credential: Option<Credential>) -> Option<Credential> {
    credential.filter(|c| !c.token.is_empty())
}

type Connecting = BoxFuture<'static, Result<Box<dyn Transport>, ClientError>>;

enum Link {
    Disconnected,
    Connecting(Connecting),
    Connected(Box<dyn Transport>),
    Reconnecting { retry_at: Instant },
}

impl Link {
    fn state(&self) -> ConnectionState {
        match self {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connecting(_) => ConnectionState::Connecting,
            Link::Connected(_) => ConnectionState::Connected,
            Link::Reconnecting { .. } => ConnectionState::Reconnecting,
        }
    }
}

enum Wake {
    Command(Option<Command>),
    Opened(Result<Box<dyn Transport>, ClientError>),
    Frame(Frame),
    Retry,
}

struct Driver {
    url: String,
    assignment_id: AssignmentId,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    router: MessageRouter,
    store: SessionStore,
    link: Link,
    attempt: u32,
    error: Option<ConnectionError>,
    self_id: Option<UserId>,
    published: ConnectionState,
    commands: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<ClientView>,
    events: broadcast::Sender<ClientEvent>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                wake = poll_link(&mut self.link) => wake,
            };

            match wake {
                Wake::Command(None) => {
                    self.close_transport("client dropped").await;
                    break;
                }
                Wake::Command(Some(Command::Connect { reply })) => {
                    let result = self.connect();
                    let _ = reply.send(result);
                }
                Wake::Command(Some(Command::Disconnect { reply })) => {
                    self.disconnect().await;
                    let _ = reply.send(());
                }
                Wake::Command(Some(Command::Send { envelope })) => self.send(envelope).await,
                Wake::Opened(Ok(transport)) => self.opened(transport),
                Wake::Opened(Err(e)) => self.open_failed(e),
                Wake::Frame(Frame::Text(text)) => self.inbound(&text),
                Wake::Frame(Frame::Closed { code, reason }) => self.closed(code, &reason),
                Wake::Retry => {
                    if let Err(e) = self.begin_attempt() {
                        tracing::debug!(error = %e, "Retry abandoned");
                    }
                }
            }
        }

        tracing::debug!(assignment_id = %self.assignment_id, "Connection driver stopped");
    }

    fn connect(&mut self) -> Result<(), ClientError> {
        if matches!(self.link, Link::Connecting(_) | Link::Connected(_)) {
            return Ok(());
        }
        self.attempt = 0;
        self.error = None;
        self.begin_attempt()
    }

    fn begin_attempt(&mut self) -> Result<(), ClientError> {
        let Some(credential) = usable(self.credentials.credential()) else {
            self.fail(ConnectionError::MissingCredential);
            return Err(ClientError::MissingCredential);
        };
        self.self_id = Some(credential.user_id.clone());

        tracing::debug!(
            assignment_id = %self.assignment_id,
            attempt = self.attempt,
            "Connecting"
        );

        let connector = self.connector.clone();
        let url = self.url.clone();
        let timeout = self.connect_timeout;
        self.link = Link::Connecting(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&url, &credential)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(timeout)),
            }
        }));
        self.publish();
        Ok(())
    }

    fn opened(&mut self, transport: Box<dyn Transport>) {
        tracing::info!(
            assignment_id = %self.assignment_id,
            attempt = self.attempt,
            "Connected"
        );
        self.link = Link::Connected(transport);
        self.attempt = 0;
        self.error = None;
        self.publish();
    }

    fn open_failed(&mut self, error: ClientError) {
        if let ClientError::Rejected(status) = &error {
            if error.is_auth_rejection() {
                tracing::warn!(
                    assignment_id = %self.assignment_id,
                    status = *status,
                    "Credential rejected"
                );
                self.fail(ConnectionError::Unauthorized(*status));
                return;
            }
        }
        self.schedule_retry(&error.to_string());
    }

    fn closed(&mut self, code: Option<u16>, reason: &str) {
        if code == Some(close_code::NORMAL) {
            tracing::info!(assignment_id = %self.assignment_id, reason, "Server closed connection");
            self.link = Link::Disconnected;
            self.store.reset();
            self.publish();
            return;
        }
        tracing::warn!(
            assignment_id = %self.assignment_id,
            code,
            reason,
            "Connection lost"
        );
        self.schedule_retry(reason);
    }

    fn schedule_retry(&mut self, reason: &str) {
        if self.attempt >= self.policy.max_attempts {
            metrics::record_reconnect("exhausted");
            tracing::warn!(
                assignment_id = %self.assignment_id,
                attempt = self.attempt,
                reason,
                "Reconnect attempts exhausted"
            );
            self.fail(ConnectionError::RetriesExhausted {
                attempts: self.attempt,
            });
            return;
        }

        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        metrics::record_reconnect("scheduled");
        tracing::info!(
            assignment_id = %self.assignment_id,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "Reconnect scheduled"
        );
        self.link = Link::Reconnecting {
            retry_at: Instant::now() + delay,
        };
        self.publish();
    }

    /// Terminal until the next explicit `connect`.
    fn fail(&mut self, error: ConnectionError) {
        self.link = Link::Disconnected;
        self.store.reset();
        self.error = Some(error.clone());
        self.publish();
        let _ = self.events.send(ClientEvent::Failed(error));
    }

    async fn disconnect(&mut self) {
        self.close_transport("client disconnect").await;
        self.link = Link::Disconnected;
        self.attempt = 0;
        self.error = None;
        self.store.reset();
        self.publish();
    }

    async fn close_transport(&mut self, reason: &str) {
        if let Link::Connected(mut transport) = std::mem::replace(&mut self.link, Link::Disconnected) {
            transport.close(close_code::NORMAL, reason).await;
            tracing::info!(assignment_id = %self.assignment_id, reason, "Disconnected");
        }
    }

    async fn send(&mut self, envelope: Envelope) {
        let Link::Connected(transport) = &mut self.link else {
            tracing::debug!(kind = envelope.kind(), "Link dropped before send, envelope discarded");
            return;
        };
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = envelope.kind(), error = %e, "Failed to serialize envelope");
                return;
            }
        };
        let result = transport.send(text).await;
        if let Err(e) = result {
            self.schedule_retry(&e.to_string());
        }
    }

    fn inbound(&mut self, text: &str) {
        let mut sink = Inbound {
            store: &mut self.store,
            events: &self.events,
        };
        self.router.route(text, &mut sink);
        self.publish();
    }

    fn publish(&mut self) {
        let state = self.link.state();
        self.view.send_replace(ClientView {
            state,
            attempt: self.attempt,
            error: self.error.clone(),
            session: self.store.session().cloned(),
            self_id: self.self_id.clone(),
        });
        if state != self.published {
            self.published = state;
            let _ = self.events.send(ClientEvent::Connection(state));
        }
    }
}

async fn poll_link(link: &mut Link) -> Wake {
    match link {
        Link::Disconnected => std::future::pending().await,
        Link::Connecting(connecting) => Wake::Opened(connecting.await),
        Link::Connected(transport) => Wake::Frame(transport.recv().await),
        Link::Reconnecting { retry_at } => {
            sleep_until(*retry_at).await;
            Wake::Retry
        }
    }
}

/// Applies routed envelopes to the store and fans them out to subscribers.
struct Inbound<'a> {
    store: &'a mut SessionStore,
    events: &'a broadcast::Sender<ClientEvent>,
}

impl EnvelopeHandler for Inbound<'_> {
    fn on_grade_update(&mut self, update: GradeUpdate) {
        let _ = self.events.send(ClientEvent::GradeUpdate(update));
    }

    fn on_criteria_comment_update(&mut self, update: CriteriaCommentUpdate) {
        let _ = self.events.send(ClientEvent::CriteriaCommentUpdate(update));
    }

    fn on_file_annotation_update(&mut self, update: FileAnnotationUpdate) {
        let _ = self.events.send(ClientEvent::FileAnnotationUpdate(update));
    }

    fn on_session_status_update(&mut self, update: SessionStatusUpdate) {
        if let Some(event) = self.store.apply_update(&update) {
            let _ = self.events.send(ClientEvent::Status(event));
        }
    }
}
