//! Scripted input loop bound to one ready session.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::constants::{ControlState, Value};
use super::session::{GameSession, SessionId};
use super::timer::TimerHandle;
use super::utils::{get_random, roll_sprint};

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session superseded or not live; nothing was issued.
    Skipped,
    /// Inputs were applied but the session was superseded during the hold,
    /// so the clear was skipped.
    Abandoned { action: ControlState, sprint: bool },
    Completed { action: ControlState, sprint: bool },
}

/// Periodic random-input driver. Deactivates itself once its session is no
/// longer the supervisor's current one; nothing ever re-enables it.
pub struct ActionLoop<S> {
    session: Arc<S>,
    current: watch::Receiver<Option<SessionId>>,
    commands: Arc<[ControlState]>,
    hold: Duration,
    rng: StdRng,
}

impl<S: GameSession> ActionLoop<S> {
    pub fn new(
        session: Arc<S>,
        current: watch::Receiver<Option<SessionId>>,
        commands: Arc<[ControlState]>,
        hold: Duration,
    ) -> Self {
        Self {
            session,
            current,
            commands,
            hold,
            rng: StdRng::from_os_rng(),
        }
    }

    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Spawn the loop; the first tick fires one hold period from now.
    pub fn start(self) -> TimerHandle {
        TimerHandle::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.hold, self.hold);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = self.tick().await;
            trace!(session = self.session.id(), ?outcome, "action tick");
        }
    }

    fn is_current(&self) -> bool {
        *self.current.borrow() == Some(self.session.id())
    }

    fn is_stale(&self) -> bool {
        !self.is_current() || !self.session.is_live()
    }

    /// One hold cycle: choose, apply, hold, clear.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.is_stale() {
            return TickOutcome::Skipped;
        }
        let Some(action) = get_random(&mut self.rng, &self.commands) else {
            return TickOutcome::Skipped;
        };
        let sprint = roll_sprint(&mut self.rng);

        self.session.set_control_state(ControlState::Sprint, sprint);
        self.session.set_control_state(action, true);

        sleep(self.hold).await;

        if !self.is_current() {
            debug!(
                session = self.session.id(),
                action = action.value(),
                "session superseded during hold, leaving inputs alone"
            );
            return TickOutcome::Abandoned { action, sprint };
        }
        self.session.clear_control_states();
        TickOutcome::Completed { action, sprint }
    }
}
