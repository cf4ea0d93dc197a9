// Session configuration.
//
// All tunables of the session core live in `SessionConfig`: listen address,
// roster cap, heartbeat cadence, join timeout, actor tick and the mid-round
// admission policy. The struct deserializes from JSON with every field
// optional (`#[serde(default)]`), so an app can ship a partial override file
// and inherit the rest from `Default`.
//
// The heartbeat defaults (10 s probe, 30 s timeout) mean a silent Peer is
// dropped after three missed probes. Tests shrink both to tens of
// milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Hard cap from the star topology: one Host plus five Peers.
pub const MAX_ROSTER: usize = 6;

/// What happens to a player who joins while a round is running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidRoundPolicy {
    /// Queue the player until the session returns to Lobby.
    #[default]
    WaitForNextRound,
    /// Promote immediately and send the running round's context, so the
    /// player joins the current round with a compensated countdown.
    ShareCurrentRound,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bind_addr: String,
    /// Listen port for `host_session`. Zero lets the OS pick.
    pub port: u16,
    /// Roster plus reconnection queue never exceeds this.
    pub max_players: usize,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Bound on dial + JOIN acceptance (and on the resync exchange).
    pub join_timeout_ms: u64,
    /// Actor wake-up cadence for timers when no events arrive.
    pub tick_ms: u64,
    /// Capacity of each subscriber's event channel.
    pub event_buffer: usize,
    pub mid_round_policy: MidRoundPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 7878,
            max_players: MAX_ROSTER,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            join_timeout_ms: 5_000,
            tick_ms: 100,
            event_buffer: 256,
            mid_round_policy: MidRoundPolicy::WaitForNextRound,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON override.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| SessionError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(SessionError::Config { message });
        if !(1..=MAX_ROSTER).contains(&self.max_players) {
            return fail(format!(
                "max_players must be 1..={MAX_ROSTER}, got {}",
                self.max_players
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return fail("heartbeat_interval_ms must be positive".into());
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return fail(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            ));
        }
        if self.tick_ms == 0 {
            return fail("tick_ms must be positive".into());
        }
        if self.event_buffer == 0 {
            return fail("event_buffer must be positive".into());
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
