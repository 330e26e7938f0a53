//! Collaborator seams between the supervisor and a game-client backend.
//!
//! A [`GameConnector`] probes reachability and establishes sessions; each
//! [`GameSession`] reports its lifecycle through the [`EventSink`] it was
//! handed at establishment, one tagged [`SessionEnvelope`] at a time.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::constants::ControlState;
use crate::config::BotConfig;
use crate::errors::{AppError, Result};

/// Generation number of one connection attempt. Never reused within a process.
pub type SessionId = u64;

/// Lifecycle events emitted by a session.
#[derive(Debug)]
pub enum SessionEvent {
    Login { username: String },
    /// The remote entity materialized (spawn or respawn).
    Ready,
    /// The remote entity is gone but the session is still open.
    Death,
    Kicked { reason: String },
    Error(AppError),
    Ended { reason: Option<String> },
}

#[derive(Debug)]
pub struct SessionEnvelope {
    pub session: SessionId,
    pub event: SessionEvent,
}

/// Per-session event emitter. Once detached every emit is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEnvelope>,
    detached: Arc<AtomicBool>,
}

impl EventSink {
    #[must_use]
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEnvelope>) -> Self {
        Self {
            session,
            tx,
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Deliver `event` to the supervisor. Returns `false` when nobody listens anymore.
    pub fn emit(&self, event: SessionEvent) -> bool {
        if self.is_detached() {
            return false;
        }
        self.tx
            .send(SessionEnvelope {
                session: self.session,
                event,
            })
            .is_ok()
    }

    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: Option<String>,
    pub secure: bool,
    pub connect_timeout: Duration,
    pub keep_alive: bool,
}

impl From<&BotConfig> for ConnectOptions {
    fn from(config: &BotConfig) -> Self {
        Self {
            host: config.client.host.clone(),
            port: config.client.port,
            username: config.client.username.clone(),
            version: config.client.version.clone(),
            secure: config.client.secure,
            connect_timeout: config.connect_timeout(),
            keep_alive: config.client.keep_alive,
        }
    }
}

pub trait GameSession: Send + Sync + 'static {
    fn id(&self) -> SessionId;

    /// Whether the remote entity is currently materialized.
    fn is_live(&self) -> bool;

    fn set_control_state(&self, control: ControlState, active: bool);

    fn clear_control_states(&self);

    /// Stop delivering lifecycle events for this session.
    fn detach_all_callbacks(&self);

    fn terminate(&self);
}

impl<T: GameSession> GameSession for Arc<T> {
    fn id(&self) -> SessionId {
        (**self).id()
    }

    fn is_live(&self) -> bool {
        (**self).is_live()
    }

    fn set_control_state(&self, control: ControlState, active: bool) {
        (**self).set_control_state(control, active);
    }

    fn clear_control_states(&self) {
        (**self).clear_control_states();
    }

    fn detach_all_callbacks(&self) {
        (**self).detach_all_callbacks();
    }

    fn terminate(&self) {
        (**self).terminate();
    }
}

/// Backend able to probe a server and open sessions against it.
pub trait GameConnector: Send + Sync + 'static {
    type Session: GameSession;

    /// Lightweight reachability check; never logs in.
    fn probe(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Open a session. Lifecycle events must be emitted through `sink`.
    fn establish(
        &self,
        id: SessionId,
        options: &ConnectOptions,
        sink: EventSink,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}
