// Core value types shared by both ends of the session protocol.
//
// Everything here travels on the wire inside `message.rs` variants, so every
// type derives `Serialize`/`Deserialize` with camelCase field names (the JSON
// shape the mobile clients already speak). `Role` is the only type that never
// crosses the wire; it lives here so the session crate and snapshot format
// share one definition.

use serde::{Deserialize, Serialize};

/// Which side of the star topology this process is playing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Host,
    Peer,
    #[default]
    None,
}

/// Round-lifecycle phase. `Terminated` is reachable from any phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Lobby,
    RoundActive,
    Scoring,
    Terminated,
}

impl Phase {
    pub fn is_round_in_progress(self) -> bool {
        matches!(self, Phase::RoundActive | Phase::Scoring)
    }
}

/// Settings agreed once per game and pushed with `GAME_START`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    /// Answers are written on paper; devices only keep time and scores.
    pub paper_mode: bool,
    /// Category lists are drawn at random instead of picked.
    pub random_mode: bool,
    pub show_timer: bool,
    pub warning_enabled: bool,
    /// Seconds before expiry at which the countdown warning fires.
    pub warning_seconds: u32,
    pub end_alert_enabled: bool,
    pub end_alert_title: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            paper_mode: false,
            random_mode: false,
            show_timer: true,
            warning_enabled: false,
            warning_seconds: 30,
            end_alert_enabled: true,
            end_alert_title: "TIEMPO TERMINADO".into(),
        }
    }
}

impl GameConfig {
    /// Warning threshold in milliseconds, or `None` when warnings are off.
    pub fn warning_threshold_ms(&self) -> Option<u64> {
        self.warning_enabled
            .then_some(u64::from(self.warning_seconds) * 1000)
    }
}

/// Round parameters chosen by the Host UI before the origin timestamp is
/// stamped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundParams {
    pub letter: String,
    pub list_id: u32,
    pub version_id: String,
    pub list_name: String,
    pub categories: Vec<String>,
    pub timer_duration_ms: u64,
}

/// A started round: the parameters plus the Host's wall-clock origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundContext {
    pub letter: String,
    pub list_id: u32,
    pub version_id: String,
    pub list_name: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub timer_duration_ms: u64,
    /// Milliseconds since the Unix epoch, stamped by the Host at broadcast.
    pub origin_timestamp: u64,
}

impl RoundContext {
    pub fn from_params(params: RoundParams, origin_timestamp: u64) -> Self {
        Self {
            letter: params.letter,
            list_id: params.list_id,
            version_id: params.version_id,
            list_name: params.list_name,
            categories: params.categories,
            timer_duration_ms: params.timer_duration_ms,
            origin_timestamp,
        }
    }

    /// Countdown a receiver should run when it sees this round at local time
    /// `now_ms`: the duration minus the observed network delay, floored at 0.
    /// A sender clock ahead of ours counts as zero delay.
    pub fn compensated_countdown_ms(&self, now_ms: u64) -> u64 {
        let network_delay = now_ms.saturating_sub(self.origin_timestamp);
        self.timer_duration_ms.saturating_sub(network_delay)
    }
}

/// One player's released result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub name: String,
    pub score: i32,
    pub answers: Vec<String>,
}
