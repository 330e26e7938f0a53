use std::time::Duration;

use serde_derive::Deserialize;

pub trait Value<T> {
    fn value(&self) -> T;

    fn from_value(val: T) -> Option<Self>
    where
        Self: Sized;
}

/// Frame operators spoken with the game bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Hello,
    Control,
    ClearControls,
    Quit,
    Event,
}

impl Value<i32> for Operator {
    fn value(&self) -> i32 {
        match self {
            Operator::Hello => 1,
            Operator::Control => 2,
            Operator::ClearControls => 3,
            Operator::Quit => 4,
            Operator::Event => 8,
        }
    }

    fn from_value(val: i32) -> Option<Self> {
        match val {
            1 => Some(Operator::Hello),
            2 => Some(Operator::Control),
            3 => Some(Operator::ClearControls),
            4 => Some(Operator::Quit),
            8 => Some(Operator::Event),
            _ => None,
        }
    }
}

/// Lifecycle events the bridge reports for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Login,
    Spawn,
    Death,
    Kicked,
    Error,
    End,
}

impl Value<&str> for LifecycleEvent {
    fn value(&self) -> &'static str {
        match self {
            LifecycleEvent::Login => "login",
            LifecycleEvent::Spawn => "spawn",
            LifecycleEvent::Death => "death",
            LifecycleEvent::Kicked => "kicked",
            LifecycleEvent::Error => "error",
            LifecycleEvent::End => "end",
        }
    }

    fn from_value(val: &str) -> Option<Self> {
        match val {
            "login" => Some(LifecycleEvent::Login),
            "spawn" => Some(LifecycleEvent::Spawn),
            "death" => Some(LifecycleEvent::Death),
            "kicked" => Some(LifecycleEvent::Kicked),
            "error" => Some(LifecycleEvent::Error),
            "end" => Some(LifecycleEvent::End),
            _ => None,
        }
    }
}

/// Symbolic input states a session can hold.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub enum ControlState {
    Forward,
    Back,
    Left,
    Right,
    Jump,
    Sprint,
    Sneak,
}

impl Value<&str> for ControlState {
    fn value(&self) -> &'static str {
        match self {
            ControlState::Forward => "forward",
            ControlState::Back => "back",
            ControlState::Left => "left",
            ControlState::Right => "right",
            ControlState::Jump => "jump",
            ControlState::Sprint => "sprint",
            ControlState::Sneak => "sneak",
        }
    }

    fn from_value(val: &str) -> Option<Self> {
        match val {
            "forward" => Some(ControlState::Forward),
            "back" => Some(ControlState::Back),
            "left" => Some(ControlState::Left),
            "right" => Some(ControlState::Right),
            "jump" => Some(ControlState::Jump),
            "sprint" => Some(ControlState::Sprint),
            "sneak" => Some(ControlState::Sneak),
            _ => None,
        }
    }
}

impl TryFrom<String> for ControlState {
    type Error = String;

    fn try_from(val: String) -> Result<Self, Self::Error> {
        ControlState::from_value(val.as_str()).ok_or_else(|| format!("unknown control state `{val}`"))
    }
}

/// Phases of one connection cycle. `Ended` loops back to `ReachabilityCheck`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    Idle,
    ReachabilityCheck,
    Connecting,
    LoggedIn,
    Ready,
    Ended,
}

impl Value<&str> for Phase {
    fn value(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::ReachabilityCheck => "reachability_check",
            Phase::Connecting => "connecting",
            Phase::LoggedIn => "logged_in",
            Phase::Ready => "ready",
            Phase::Ended => "ended",
        }
    }

    fn from_value(val: &str) -> Option<Self> {
        match val {
            "idle" => Some(Phase::Idle),
            "reachability_check" => Some(Phase::ReachabilityCheck),
            "connecting" => Some(Phase::Connecting),
            "logged_in" => Some(Phase::LoggedIn),
            "ready" => Some(Phase::Ready),
            "ended" => Some(Phase::Ended),
            _ => None,
        }
    }
}

pub mod defaults {
    // session establishment bound
    pub const CONNECT_TIMEOUT_MS: u64 = 60_000;
    // wait between reachability probes
    pub const PROBE_INTERVAL_MS: u64 = 10_000;
    // bound on a single probe
    pub const PROBE_TIMEOUT_MS: u64 = 5_000;
    // reconnect backoff cap
    pub const MAX_RETRY_DELAY_MS: u64 = 120_000;
}

// ping period on the bridge socket while keep-alive is on
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
// silence after which a keep-alive session is considered dead
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(30);
// how long terminate waits for the close handshake before dropping the socket
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub const SPRINT_PROBABILITY: f64 = 0.5;
