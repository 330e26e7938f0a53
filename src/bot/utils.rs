use std::time::Duration;

use rand::seq::IndexedRandom;
use rand::Rng;

use super::constants::{ControlState, SPRINT_PROBABILITY};

/// Pick one control uniformly at random. `None` only for an empty vocabulary.
pub fn get_random<R: Rng>(rng: &mut R, commands: &[ControlState]) -> Option<ControlState> {
    commands.choose(rng).copied()
}

pub fn roll_sprint<R: Rng>(rng: &mut R) -> bool {
    rng.random_bool(SPRINT_PROBABILITY)
}

/// Seconds with one decimal, for log lines.
pub fn as_secs_str(duration: Duration) -> String {
    format!("{:.1}", duration.as_secs_f64())
}
