//! Connection supervisor: keeps one live session, reconnecting with backoff.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::bot_actions::ActionLoop;
use super::constants::{ControlState, Phase, Value};
use super::session::{ConnectOptions, EventSink, GameConnector, GameSession, SessionEnvelope, SessionEvent, SessionId};
use super::timer::TimerHandle;
use super::utils::as_secs_str;
use crate::config::BotConfig;
use crate::errors::{AppError, Result};

pub struct BotClient<C: GameConnector> {
    config: Arc<BotConfig>,
    options: ConnectOptions,
    commands: Arc<[ControlState]>,
    connector: C,
    session: Option<Arc<C::Session>>,
    current: watch::Sender<Option<SessionId>>,
    next_id: SessionId,
    action_timer: Option<TimerHandle>,
    backoff: Backoff,
    reconnecting: bool,
    phase: Phase,
    events_tx: mpsc::UnboundedSender<SessionEnvelope>,
    events_rx: mpsc::UnboundedReceiver<SessionEnvelope>,
}

impl<C: GameConnector> BotClient<C> {
    pub fn new(config: Arc<BotConfig>, connector: C) -> Self {
        let (current, _) = watch::channel(None);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        BotClient {
            options: ConnectOptions::from(config.as_ref()),
            commands: Arc::from(config.action.commands.clone()),
            backoff: Backoff::new(config.retry_delay(), config.max_retry_delay()),
            config,
            connector,
            session: None,
            current,
            next_id: 1,
            action_timer: None,
            reconnecting: false,
            phase: Phase::Idle,
            events_tx,
            events_rx,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    #[must_use]
    pub fn current_session(&self) -> Option<SessionId> {
        *self.current.borrow()
    }

    #[must_use]
    pub fn has_action_timer(&self) -> bool {
        self.action_timer.is_some()
    }

    /// Drive connection cycles until `shutdown` fires, then clean up.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.connect() => {}
            }
            if !self.drive_session(&shutdown).await {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.schedule_reconnect() => {}
            }
        }
        self.cleanup();
        info!("bot stopped");
    }

    /// Consume lifecycle events until the current session ends.
    /// Returns `false` if shutdown interrupted it.
    async fn drive_session(&mut self, shutdown: &CancellationToken) -> bool {
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => return false,
                envelope = self.events_rx.recv() => envelope,
            };
            // the supervisor holds a sender, so the channel never closes while it lives
            let Some(envelope) = envelope else { return true };
            if self.handle_event(envelope) {
                return true;
            }
        }
    }

    /// Poll the server with a lightweight probe until it answers. Never gives up.
    pub async fn wait_for_reachable(&mut self) {
        self.phase = Phase::ReachabilityCheck;
        let host = self.config.client.host.as_str();
        let port = self.config.client.port;
        let probe_timeout = self.config.probe_timeout();
        let interval = self.config.probe_interval();
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.connector.probe(host, port, probe_timeout).await {
                Ok(()) => {
                    debug!(host, port, attempt, "server reachable");
                    return;
                }
                Err(err) => {
                    warn!(
                        host,
                        port,
                        attempt,
                        error = %err,
                        "server unreachable, retrying in {}s",
                        as_secs_str(interval)
                    );
                    sleep(interval).await;
                }
            }
        }
    }

    /// Establish a new current session. Failed attempts go through
    /// [`Self::schedule_reconnect`] and are retried until one succeeds.
    pub async fn connect(&mut self) {
        loop {
            match self.try_connect().await {
                Ok(()) => return,
                Err(err) => {
                    self.phase = Phase::Ended;
                    report_error("failed to establish session", &err);
                    self.schedule_reconnect().await;
                }
            }
        }
    }

    async fn try_connect(&mut self) -> Result<()> {
        self.reconnecting = false;
        if self.session.is_some() {
            self.cleanup();
        }
        self.wait_for_reachable().await;

        self.phase = Phase::Connecting;
        let id = self.next_id;
        self.next_id += 1;
        let sink = EventSink::new(id, self.events_tx.clone());
        info!(
            session = id,
            host = %self.options.host,
            port = self.options.port,
            username = %self.options.username,
            "connecting"
        );

        let limit = self.options.connect_timeout;
        let session = match timeout(limit, self.connector.establish(id, &self.options, sink.clone())).await {
            Ok(res) => res,
            Err(_) => Err(AppError::Timeout(format!(
                "session not established within {}s",
                as_secs_str(limit)
            ))),
        };
        let session = match session {
            Ok(session) => session,
            Err(err) => {
                sink.detach();
                return Err(err);
            }
        };

        self.session = Some(Arc::new(session));
        self.current.send_replace(Some(id));
        Ok(())
    }

    /// Stop the action timer and tear down the current session, if any.
    pub fn cleanup(&mut self) {
        if let Some(timer) = self.action_timer.take() {
            timer.cancel();
        }
        if let Some(session) = self.session.take() {
            session.detach_all_callbacks();
            session.terminate();
            debug!(session = session.id(), "session torn down");
        }
        self.current.send_replace(None);
    }

    /// Tear down and wait out the backoff before the next `connect`.
    ///
    /// Returns `false` without doing anything if a reconnect is already pending.
    pub async fn schedule_reconnect(&mut self) -> bool {
        if self.reconnecting {
            debug!("reconnect already scheduled");
            return false;
        }
        self.reconnecting = true;

        let delay = self.backoff.current();
        info!("reconnecting in {}s...", as_secs_str(delay));
        self.cleanup();
        sleep(delay).await;
        self.backoff.advance();
        true
    }

    /// Apply one lifecycle event. Returns `true` when the current session ended.
    pub fn handle_event(&mut self, envelope: SessionEnvelope) -> bool {
        if self.current_session() != Some(envelope.session) {
            debug!(session = envelope.session, "dropping event from superseded session");
            return false;
        }
        match envelope.event {
            SessionEvent::Login { username } => {
                self.phase = Phase::LoggedIn;
                self.backoff.reset();
                info!(session = envelope.session, "logged in as {username}");
            }
            SessionEvent::Ready => {
                self.phase = Phase::Ready;
                self.start_actions();
            }
            SessionEvent::Death => {
                debug!(session = envelope.session, "entity despawned");
            }
            SessionEvent::Kicked { reason } => {
                warn!(session = envelope.session, %reason, "kicked");
            }
            SessionEvent::Error(err) => report_error("session error", &err),
            SessionEvent::Ended { reason } => {
                self.phase = Phase::Ended;
                info!(
                    session = envelope.session,
                    reason = reason.as_deref().unwrap_or("none"),
                    "session ended"
                );
                return true;
            }
        }
        debug!(phase = self.phase.value(), "lifecycle phase");
        false
    }

    fn start_actions(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        // a respawn replaces the previous loop
        if let Some(timer) = self.action_timer.take() {
            timer.cancel();
        }
        let actions = ActionLoop::new(
            session.clone(),
            self.current.subscribe(),
            self.commands.clone(),
            self.config.hold_duration(),
        );
        self.action_timer = Some(actions.start());
        debug!(session = session.id(), "action loop started");
    }
}

fn report_error(context: &str, err: &AppError) {
    if err.is_timeout() {
        warn!(error = %err, "{context} (timeout)");
    } else {
        error!(error = %err, "{context}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::fakes::{Call, Establish, FakeConnector};
    use std::time::Duration;
    use tokio::time::Instant;

    const CONFIG: &str = r#"{
        "client": { "host": "localhost", "port": 25565, "username": "afk", "probeInterval": 10000 },
        "action": { "commands": ["forward", "left"], "holdDuration": 1000, "retryDelay": 5000, "maxRetryDelay": 120000 }
    }"#;

    fn client(connector: FakeConnector) -> BotClient<FakeConnector> {
        let config = BotConfig::from_json_str(CONFIG).unwrap();
        BotClient::new(Arc::new(config), connector)
    }

    fn envelope(session: SessionId, event: SessionEvent) -> SessionEnvelope {
        SessionEnvelope { session, event }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_retries_until_reachable_then_establishes_once() {
        let connector = FakeConnector::default()
            .probes(&[false, false, false, true])
            .establishes(&[Establish::Succeed]);
        let mut bot = client(connector.clone());
        let start = Instant::now();

        bot.connect().await;

        assert_eq!(connector.probe_times().len(), 4);
        let establishes = connector.establish_times();
        assert_eq!(establishes.len(), 1);
        assert_eq!(establishes[0] - start, Duration::from_secs(30));
        assert_eq!(bot.current_session(), Some(1));
        assert_eq!(bot.phase(), Phase::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_establishment_leaves_no_session() {
        let connector = FakeConnector::default().establishes(&[Establish::Fail("refused")]);
        let mut bot = client(connector);

        let err = bot.try_connect().await.unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(bot.current_session(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn establishment_is_bounded_by_connect_timeout() {
        let connector = FakeConnector::default().establishes(&[Establish::Hang]);
        let mut bot = client(connector);
        let start = Instant::now();

        let err = bot.try_connect().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_failed_establishment_through_backoff() {
        let connector = FakeConnector::default()
            .establishes(&[Establish::Fail("refused"), Establish::Succeed]);
        let mut bot = client(connector.clone());
        let start = Instant::now();

        bot.connect().await;

        let times = connector.establish_times();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1] - start, Duration::from_millis(5_000));
        assert_eq!(bot.current_session(), Some(2));
        assert!(!bot.is_reconnecting());
        assert_eq!(bot.backoff().current(), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_over_a_live_session_tears_it_down_first() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed, Establish::Succeed]);
        let mut bot = client(connector.clone());
        bot.connect().await;
        bot.handle_event(envelope(1, SessionEvent::Ready));

        bot.connect().await;

        assert_eq!(bot.current_session(), Some(2));
        let first = &connector.sessions()[0];
        assert!(first.calls().contains(&Call::Detach));
        assert!(first.calls().contains(&Call::Terminate));
        assert!(!bot.has_action_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_reconnect_in_flight_until_next_connect() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector);

        assert!(bot.schedule_reconnect().await);
        assert!(bot.is_reconnecting());
        let after_first = bot.backoff().current();

        let start = Instant::now();
        assert!(!bot.schedule_reconnect().await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(bot.backoff().current(), after_first);

        bot.connect().await;
        assert!(!bot.is_reconnecting());
        assert!(bot.schedule_reconnect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn login_resets_backoff() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector);
        for _ in 0..3 {
            bot.schedule_reconnect().await;
            bot.reconnecting = false;
        }
        assert_eq!(bot.backoff().current(), Duration::from_millis(40_000));

        bot.connect().await;
        let ended = bot.handle_event(envelope(1, SessionEvent::Login { username: "afk".into() }));
        assert!(!ended);
        assert_eq!(bot.phase(), Phase::LoggedIn);
        assert_eq!(bot.backoff().current(), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_superseded_sessions_are_ignored() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector);
        bot.connect().await;

        assert!(!bot.handle_event(envelope(99, SessionEvent::Ended { reason: None })));
        assert!(!bot.handle_event(envelope(99, SessionEvent::Ready)));
        assert!(!bot.has_action_timer());
        assert!(bot.handle_event(envelope(1, SessionEvent::Ended { reason: None })));
        assert_eq!(bot.phase(), Phase::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_and_kicks_do_not_end_the_session() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector);
        bot.connect().await;

        assert!(!bot.handle_event(envelope(1, SessionEvent::Error(AppError::Timeout("read".into())))));
        assert!(!bot.handle_event(envelope(1, SessionEvent::Error(AppError::Session("boom".into())))));
        assert!(!bot.handle_event(envelope(1, SessionEvent::Kicked { reason: "afk".into() })));
        assert_eq!(bot.current_session(), Some(1));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn line_with(&self, needle: &str) -> String {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .find(|line| line.contains(needle))
                .map(str::to_owned)
                .unwrap_or_default()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_errors_are_logged_by_severity_class() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector);
        bot.connect().await;
        bot.handle_event(envelope(
            1,
            SessionEvent::Error(AppError::Session("client timed out after 30000 ms".into())),
        ));
        bot.handle_event(envelope(1, SessionEvent::Error(AppError::Protocol("bad packet".into()))));

        let timeout_line = logs.line_with("client timed out");
        assert!(timeout_line.contains("WARN"), "{timeout_line}");
        assert!(!timeout_line.contains("ERROR"), "{timeout_line}");

        let other_line = logs.line_with("bad packet");
        assert!(other_line.contains("ERROR"), "{other_line}");
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_is_idempotent_and_tears_everything_down() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector.clone());
        bot.cleanup();

        bot.connect().await;
        bot.handle_event(envelope(1, SessionEvent::Ready));
        assert!(bot.has_action_timer());

        bot.cleanup();
        bot.cleanup();
        assert!(!bot.has_action_timer());
        assert_eq!(bot.current_session(), None);
        let session = &connector.sessions()[0];
        assert_eq!(
            session.calls().iter().filter(|c| **c == Call::Terminate).count(),
            1
        );
        assert!(session.calls().contains(&Call::Detach));
    }

    #[tokio::test(start_paused = true)]
    async fn respawn_replaces_the_action_timer() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed]);
        let mut bot = client(connector.clone());
        bot.connect().await;

        bot.handle_event(envelope(1, SessionEvent::Ready));
        bot.handle_event(envelope(1, SessionEvent::Death));
        bot.handle_event(envelope(1, SessionEvent::Ready));

        // one loop ticking at 1000ms sets exactly one action
        sleep(Duration::from_millis(1_500)).await;
        let session = &connector.sessions()[0];
        let sets = session
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Set(control, true) if *control != ControlState::Sprint))
            .count();
        assert_eq!(sets, 1);
        bot.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_across_failed_cycles_and_caps() {
        let connector = FakeConnector::default();
        let mut bot = client(connector.clone());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let start = Instant::now();
        let task = tokio::spawn(async move {
            bot.run(token).await;
            bot
        });

        sleep(Duration::from_millis(5_000 + 10_000 + 20_000 + 40_000 + 80_000 + 120_000 + 120_000 + 1)).await;
        shutdown.cancel();
        let bot = task.await.unwrap();

        let gaps: Vec<u64> = connector
            .establish_times()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert_eq!(connector.establish_times()[0], start);
        assert_eq!(gaps, vec![5_000, 10_000, 20_000, 40_000, 80_000, 120_000, 120_000]);
        assert_eq!(bot.current_session(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ended_session_is_replaced_and_stale_loop_goes_quiet() {
        let connector = FakeConnector::default().establishes(&[Establish::Succeed, Establish::Succeed]);
        let mut bot = client(connector.clone());
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            bot.run(token).await;
            bot
        });

        sleep(Duration::from_millis(1)).await;
        let first = connector.sessions()[0].clone();
        assert!(first.emit(SessionEvent::Login { username: "afk".into() }));
        assert!(first.emit(SessionEvent::Ready));

        // first tick at ~1001ms, end the session mid-hold
        sleep(Duration::from_millis(1_500)).await;
        assert!(first.emit(SessionEvent::Ended { reason: None }));
        sleep(Duration::from_millis(1)).await;

        let calls = first.calls();
        assert!(calls.contains(&Call::Detach));
        assert!(calls.contains(&Call::Terminate));
        assert!(!calls.contains(&Call::ClearAll));
        assert!(!first.emit(SessionEvent::Ready));

        // login reset the backoff, so the next attempt comes after the base delay
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(connector.sessions().len(), 2);
        let times = connector.establish_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(6_501));

        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(first.calls(), calls);

        shutdown.cancel();
        let bot = task.await.unwrap();
        assert_eq!(bot.current_session(), None);
        assert!(connector.sessions()[1].calls().contains(&Call::Terminate));
    }
}
