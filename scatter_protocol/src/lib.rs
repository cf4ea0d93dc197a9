// scatter_protocol: wire protocol for Host/Peer session synchronization.
//
// Defines the message vocabulary, value types and framing used by the
// session crate (`scatter_session`) on both the Host and the Peer side. It
// has no networking of its own beyond `Read`/`Write` adapters.
//
// Module overview:
// - `types.rs`:    `Role`, `Phase`, `GameConfig`, `RoundParams`,
//                  `RoundContext` (with clock compensation), `PlayerResult`.
// - `message.rs`:  The tagged-union `Message` enum, one variant per wire tag.
// - `framing.rs`:  `\n`-delimited framing: `encode`, `write_frame`, the
//                  sans-IO `Framer` and the blocking `FramedReader`.
// - `error.rs`:    `ProtocolError`.
//
// Design decisions:
// - **JSON text frames.** The mobile clients already exchange JSON events;
//   keeping the wire textual keeps them debuggable with a plain socket tool.
// - **Delimiter, not length prefix.** The mobile socket layer delivers
//   newline-delimited reads, and compact JSON never contains a raw newline.
// - **No async runtime.** `std::io` only, usable from blocking reader
//   threads and from in-memory buffers in tests.

pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use error::ProtocolError;
pub use framing::{DELIMITER, FramedReader, Framer, MAX_FRAME_SIZE, encode, write_frame};
pub use message::Message;
pub use types::{GameConfig, Phase, PlayerResult, Role, RoundContext, RoundParams};

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Message) {
        let bytes = encode(msg).unwrap();
        let mut framer = Framer::new();
        let recovered: Vec<Message> = framer.feed(&bytes);
        assert_eq!(recovered.as_slice(), std::slice::from_ref(msg));
    }

    fn round() -> RoundContext {
        RoundContext {
            letter: "B".into(),
            list_id: 1,
            version_id: "original_1988".into(),
            list_name: "Lista 1".into(),
            categories: vec!["Animal".into(), "Ciudad".into()],
            timer_duration_ms: 120_000,
            origin_timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn wire_shape_is_adjacently_tagged_camel_case() {
        let json = serde_json::to_value(Message::Pong {
            name: "Ana".into(),
            timestamp: 5,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "PONG", "data": {"name": "Ana", "timestamp": 5}})
        );

        let json = serde_json::to_value(Message::RoundStart(round())).unwrap();
        assert_eq!(json["type"], "ROUND_START");
        assert_eq!(json["data"]["timerDurationMs"], 120_000);
        assert_eq!(json["data"]["originTimestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn notification_tags_have_no_payload() {
        let json = serde_json::to_string(&Message::TimerEnd).unwrap();
        assert_eq!(json, r#"{"type":"TIMER_END"}"#);
        let msg: Message = serde_json::from_str(r#"{"type":"ROUND_ABANDONED"}"#).unwrap();
        assert_eq!(msg, Message::RoundAbandoned);
    }

    #[test]
    fn roster_update_pending_is_optional() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"ROSTER_UPDATE","data":{"names":["H","P1"]}}"#)
                .unwrap();
        assert_eq!(
            msg,
            Message::RosterUpdate {
                names: vec!["H".into(), "P1".into()],
                pending: vec![],
            }
        );
    }

    #[test]
    fn tag_matches_serialized_type() {
        let messages = [
            Message::Join { name: "P".into() },
            Message::GameStart(GameConfig::default()),
            Message::GameConfigUpdate { paper_mode: true },
            Message::AllScores {
                results: vec![PlayerResult {
                    name: "H".into(),
                    score: 9,
                    answers: vec!["Burro".into()],
                }],
                letter: "B".into(),
                list_name: "Lista 1".into(),
                list_id: 1,
                version_id: "original_1988".into(),
            },
            Message::SyncResponse {
                phase: Phase::Scoring,
                roster: vec!["H".into()],
                game_config: None,
            },
            Message::GameFinalize,
        ];
        for msg in &messages {
            let json = serde_json::to_value(msg).unwrap();
            assert_eq!(json["type"], msg.tag());
            roundtrip(msg);
        }
    }

    #[test]
    fn session_level_routing_classes() {
        assert!(Message::Ping { timestamp: 1 }.is_session_level());
        assert!(Message::PlayerLeft { name: "P".into() }.is_session_level());
        assert!(!Message::TimerEnd.is_session_level());
        assert!(!Message::RoundStart(round()).is_session_level());
    }
}
