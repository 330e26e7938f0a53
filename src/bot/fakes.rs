//! In-memory collaborators for exercising the supervisor and action loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::constants::ControlState;
use super::session::{ConnectOptions, EventSink, GameConnector, GameSession, SessionEvent, SessionId};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Set(ControlState, bool),
    ClearAll,
    Detach,
    Terminate,
}

#[derive(Debug)]
pub struct FakeSession {
    id: SessionId,
    live: AtomicBool,
    sink: EventSink,
    calls: Mutex<Vec<Call>>,
}

impl FakeSession {
    pub fn new(id: SessionId, sink: EventSink) -> Self {
        Self {
            id,
            live: AtomicBool::new(true),
            sink,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn emit(&self, event: SessionEvent) -> bool {
        self.sink.emit(event)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl GameSession for FakeSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn set_control_state(&self, control: ControlState, active: bool) {
        self.record(Call::Set(control, active));
    }

    fn clear_control_states(&self) {
        self.record(Call::ClearAll);
    }

    fn detach_all_callbacks(&self) {
        self.sink.detach();
        self.record(Call::Detach);
    }

    fn terminate(&self) {
        self.record(Call::Terminate);
    }
}

/// Scripted outcome of one `establish` call.
#[derive(Debug, Clone)]
pub enum Establish {
    Succeed,
    Fail(&'static str),
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    probes: VecDeque<bool>,
    establishes: VecDeque<Establish>,
    probe_times: Vec<Instant>,
    establish_times: Vec<Instant>,
    sessions: Vec<Arc<FakeSession>>,
}

/// Connector whose probe and establish outcomes are scripted up front.
/// Unscripted probes succeed and unscripted establishes fail.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    script: Arc<Mutex<Script>>,
}

impl FakeConnector {
    pub fn probes(self, outcomes: &[bool]) -> Self {
        self.script.lock().unwrap().probes.extend(outcomes);
        self
    }

    pub fn establishes(self, outcomes: &[Establish]) -> Self {
        self.script
            .lock()
            .unwrap()
            .establishes
            .extend(outcomes.iter().cloned());
        self
    }

    pub fn probe_times(&self) -> Vec<Instant> {
        self.script.lock().unwrap().probe_times.clone()
    }

    pub fn establish_times(&self) -> Vec<Instant> {
        self.script.lock().unwrap().establish_times.clone()
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.script.lock().unwrap().sessions.clone()
    }
}

impl GameConnector for FakeConnector {
    type Session = Arc<FakeSession>;

    async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.probe_times.push(Instant::now());
        if script.probes.pop_front().unwrap_or(true) {
            Ok(())
        } else {
            Err(AppError::Io("connection refused".into()))
        }
    }

    async fn establish(
        &self,
        id: SessionId,
        _options: &ConnectOptions,
        sink: EventSink,
    ) -> Result<Self::Session> {
        let outcome = {
            let mut script = self.script.lock().unwrap();
            script.establish_times.push(Instant::now());
            script
                .establishes
                .pop_front()
                .unwrap_or(Establish::Fail("unscripted"))
        };
        match outcome {
            Establish::Succeed => {
                let session = Arc::new(FakeSession::new(id, sink));
                self.script.lock().unwrap().sessions.push(session.clone());
                Ok(session)
            }
            Establish::Fail(message) => Err(AppError::Transport(message.into())),
            Establish::Hang => std::future::pending().await,
        }
    }
}
