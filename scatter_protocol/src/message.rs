// Protocol messages exchanged between the Host and its Peers.
//
// A single `Message` enum carries the whole vocabulary in both directions.
// It serializes adjacently tagged: `{"type":"ROUND_START","data":{...}}`,
// tags in SCREAMING_SNAKE_CASE, payload fields in camelCase. Payload-free
// notifications serialize as `{"type":"TIMER_END"}`.
//
// Direction is a routing convention, not a type distinction: the Host's
// state machine ignores Host→all tags when they arrive from a Peer and vice
// versa. `Message::tag()` gives the wire tag for logging without
// re-serializing.

use serde::{Deserialize, Serialize};

use crate::types::{GameConfig, Phase, PlayerResult, RoundContext};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// Peer asks to be admitted under `name`. First message on a connection.
    Join { name: String },
    /// Host refuses a join (duplicate name, full session, empty name).
    JoinRefused { reason: String },
    /// Current roster, plus names waiting in the reconnection queue.
    RosterUpdate {
        names: Vec<String>,
        #[serde(default)]
        pending: Vec<String>,
    },
    PlayerLeft { name: String },
    /// Once-per-game settings; also unicast to promoted reconnections.
    GameStart(GameConfig),
    /// Lobby-time toggle of paper mode.
    GameConfigUpdate { paper_mode: bool },
    RoundStart(RoundContext),
    TimerEnd,
    ScoreSubmit {
        name: String,
        score: i32,
        answers: Vec<String>,
    },
    ScoreAck { name: String },
    /// Barrier release: every roster member's result for the round.
    AllScores {
        results: Vec<PlayerResult>,
        letter: String,
        list_name: String,
        list_id: u32,
        version_id: String,
    },
    Ping { timestamp: u64 },
    Pong { name: String, timestamp: u64 },
    RequestSync { name: String },
    SyncResponse {
        phase: Phase,
        roster: Vec<String>,
        game_config: Option<GameConfig>,
    },
    GameFinalize,
    ReturnToWaiting,
    RoundAbandoned,
}

impl Message {
    /// Wire tag, for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Join { .. } => "JOIN",
            Message::JoinRefused { .. } => "JOIN_REFUSED",
            Message::RosterUpdate { .. } => "ROSTER_UPDATE",
            Message::PlayerLeft { .. } => "PLAYER_LEFT",
            Message::GameStart(_) => "GAME_START",
            Message::GameConfigUpdate { .. } => "GAME_CONFIG_UPDATE",
            Message::RoundStart(_) => "ROUND_START",
            Message::TimerEnd => "TIMER_END",
            Message::ScoreSubmit { .. } => "SCORE_SUBMIT",
            Message::ScoreAck { .. } => "SCORE_ACK",
            Message::AllScores { .. } => "ALL_SCORES",
            Message::Ping { .. } => "PING",
            Message::Pong { .. } => "PONG",
            Message::RequestSync { .. } => "REQUEST_SYNC",
            Message::SyncResponse { .. } => "SYNC_RESPONSE",
            Message::GameFinalize => "GAME_FINALIZE",
            Message::ReturnToWaiting => "RETURN_TO_WAITING",
            Message::RoundAbandoned => "ROUND_ABANDONED",
        }
    }

    /// True for messages that every bound connection receives, including
    /// players still waiting in the reconnection queue.
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            Message::RosterUpdate { .. }
                | Message::PlayerLeft { .. }
                | Message::Ping { .. }
                | Message::GameFinalize
        )
    }
}
