// Peer-side session state, driven by the peer actor.
//
// A Peer owns nothing shared. Its roster, phase, GameConfig and RoundContext
// are caches written only by inbound Host messages. What it does own is its
// local countdown: on ROUND_START it runs `compensated_countdown_ms` from
// its own clock, and local expiry moves it to Scoring without waiting for
// TIMER_END. It answers every PING with a PONG and persists each released
// round. Like `HostState` it does no socket I/O.

use std::sync::Arc;

use scatter_protocol::{GameConfig, Message, Phase, Role, RoundContext};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EventBus, SessionEvent};
use crate::storage::{GameStore, RoundResult};
use crate::timer::{RoundTimer, TimerTick};
use crate::transport::Outbox;
use crate::view::{SessionView, SharedView};

pub struct PeerState {
    self_name: String,
    outbox: Outbox,
    phase: Phase,
    roster: Vec<String>,
    pending: Vec<String>,
    game_config: Option<GameConfig>,
    round: Option<RoundContext>,
    timer: Option<RoundTimer>,
    bus: EventBus,
    store: Arc<dyn GameStore>,
    view: SharedView,
}

impl PeerState {
    pub fn new(self_name: &str, outbox: Outbox, bus: EventBus, store: Arc<dyn GameStore>) -> Self {
        let state = Self {
            self_name: self_name.to_owned(),
            outbox,
            phase: Phase::Lobby,
            roster: Vec::new(),
            pending: Vec::new(),
            game_config: None,
            round: None,
            timer: None,
            bus,
            store,
            view: SharedView::default(),
        };
        state.sync_view();
        state
    }

    pub fn shared_view(&self) -> SharedView {
        self.view.clone()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            role: Role::Peer,
            self_name: self.self_name.clone(),
            phase: self.phase,
            roster: self.roster.clone(),
            pending: self.pending.clone(),
            game_config: self.game_config.clone(),
            round: self.round.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn sync_view(&self) {
        self.view.set(self.view());
    }

    fn publish(&self, event: SessionEvent) {
        self.sync_view();
        self.bus.publish(event);
    }

    pub fn handle_message(&mut self, message: Message, now_ms: u64) {
        let mut countdown = None;
        match &message {
            Message::RosterUpdate { names, pending } => {
                self.roster.clone_from(names);
                self.pending.clone_from(pending);
                if pending.contains(&self.self_name) && !names.contains(&self.self_name) {
                    if self.phase.is_round_in_progress() {
                        info!("queued for the next round");
                    }
                    self.leave_round();
                }
            }
            Message::GameStart(config) => {
                self.game_config = Some(config.clone());
                self.leave_round();
            }
            Message::GameConfigUpdate { paper_mode } => {
                self.game_config
                    .get_or_insert_with(GameConfig::default)
                    .paper_mode = *paper_mode;
            }
            Message::RoundStart(ctx) => {
                let remaining_ms = ctx.compensated_countdown_ms(now_ms);
                let warning = self
                    .game_config
                    .as_ref()
                    .and_then(GameConfig::warning_threshold_ms);
                info!(
                    letter = %ctx.letter,
                    delay_ms = now_ms.saturating_sub(ctx.origin_timestamp),
                    remaining_ms,
                    "round started"
                );
                self.timer = Some(RoundTimer::start(now_ms, remaining_ms, warning));
                self.round = Some(ctx.clone());
                self.phase = Phase::RoundActive;
                countdown = Some(remaining_ms);
            }
            Message::TimerEnd => {
                self.timer = None;
                if self.phase == Phase::RoundActive {
                    self.phase = Phase::Scoring;
                }
            }
            Message::AllScores {
                results,
                letter,
                list_name,
                list_id,
                version_id,
            } => {
                self.timer = None;
                self.phase = Phase::Lobby;
                let result = RoundResult {
                    letter: letter.clone(),
                    list_id: *list_id,
                    version_id: version_id.clone(),
                    list_name: list_name.clone(),
                    results: results.clone(),
                    finished_at: now_ms,
                };
                if let Err(e) = self.store.persist_round_result(&result) {
                    warn!(error = %e, "failed to persist round result");
                }
            }
            Message::Ping { .. } => {
                self.outbox.send(&Message::Pong {
                    name: self.self_name.clone(),
                    timestamp: now_ms,
                });
            }
            Message::SyncResponse {
                phase,
                roster,
                game_config,
            } => {
                info!(?phase, players = roster.len(), "state resynced");
                self.phase = *phase;
                self.roster.clone_from(roster);
                self.game_config.clone_from(game_config);
                if !phase.is_round_in_progress() {
                    self.timer = None;
                }
            }
            Message::GameFinalize => {
                info!("game finalized by host");
                self.timer = None;
                self.phase = Phase::Terminated;
                if let Err(e) = self.store.finalize_game() {
                    debug!(error = %e, "nothing to finalize in store");
                }
            }
            Message::JoinRefused { reason } => {
                warn!(reason = %reason, "host refused join");
            }
            Message::PlayerLeft { .. }
            | Message::ScoreAck { .. }
            | Message::ReturnToWaiting
            | Message::RoundAbandoned => {}
            other => {
                warn!(tag = other.tag(), "unexpected message from host");
            }
        }
        self.publish(SessionEvent::Message(message));
        if let Some(remaining_ms) = countdown {
            self.publish(SessionEvent::CountdownStarted { remaining_ms });
        }
    }

    pub fn tick(&mut self, now_ms: u64) {
        let tick = self.timer.as_mut().and_then(|t| t.poll(now_ms));
        match tick {
            Some(TimerTick::Warning { remaining_ms }) => {
                self.publish(SessionEvent::TimerWarning { remaining_ms });
            }
            Some(TimerTick::Expired) => {
                if self.phase == Phase::RoundActive {
                    self.phase = Phase::Scoring;
                }
                info!("local round timer expired");
                self.publish(SessionEvent::TimerExpired);
            }
            None => {}
        }
    }

    /// The Host's transport dropped.
    pub fn connection_lost(&mut self) {
        self.timer = None;
        if self.phase == Phase::Terminated {
            return;
        }
        warn!("connection to host lost");
        self.publish(SessionEvent::ConnectionLost);
    }

    fn send(&self, message: &Message) -> Result<()> {
        if self.outbox.send(message) {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Back to Lobby without a running countdown. Queued players never see
    /// TIMER_END or ALL_SCORES for the round they missed.
    fn leave_round(&mut self) {
        self.timer = None;
        if self.phase != Phase::Terminated {
            self.phase = Phase::Lobby;
        }
    }

    pub fn send_message(&self, message: Message) -> Result<()> {
        self.send(&message)
    }

    pub fn submit_score(&self, score: i32, answers: Vec<String>) -> Result<()> {
        if !self.phase.is_round_in_progress() {
            return Err(SessionError::InvalidPhase {
                phase: self.phase,
                operation: "submit_score",
            });
        }
        self.send(&Message::ScoreSubmit {
            name: self.self_name.clone(),
            score,
            answers,
        })
    }

    pub fn request_sync(&self) -> Result<()> {
        self.send(&Message::RequestSync {
            name: self.self_name.clone(),
        })
    }

    pub fn abandon(&self) -> Result<()> {
        self.send(&Message::RoundAbandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver};

    use scatter_protocol::{Framer, PlayerResult};

    use crate::events::Subscription;
    use crate::storage::MemoryStore;

    fn peer() -> (PeerState, Receiver<Vec<u8>>, Subscription, Arc<MemoryStore>) {
        let (tx, rx) = mpsc::channel();
        let bus = EventBus::new(64);
        let events = bus.subscribe();
        let store = Arc::new(MemoryStore::new());
        let state = PeerState::new("P1", Outbox::new("host", tx), bus, store.clone());
        (state, rx, events, store)
    }

    fn sent(rx: &Receiver<Vec<u8>>) -> Vec<Message> {
        let mut framer = Framer::new();
        let mut out = Vec::new();
        for chunk in rx.try_iter() {
            out.extend(framer.feed::<Message>(&chunk));
        }
        out
    }

    fn round(origin: u64, duration: u64) -> RoundContext {
        RoundContext {
            letter: "S".into(),
            list_id: 4,
            version_id: "v".into(),
            list_name: "Lista 4".into(),
            categories: vec!["Animal".into()],
            timer_duration_ms: duration,
            origin_timestamp: origin,
        }
    }

    #[test]
    fn countdown_is_compensated_for_network_delay() {
        let (mut state, _rx, events, _) = peer();
        state.handle_message(Message::RoundStart(round(10_000, 60_000)), 10_750);
        assert_eq!(state.phase(), Phase::RoundActive);
        let got = events.drain();
        assert_eq!(
            got.last(),
            Some(&SessionEvent::CountdownStarted {
                remaining_ms: 59_250
            })
        );

        state.tick(70_000);
        assert_eq!(state.phase(), Phase::Scoring);
        assert!(events.drain().contains(&SessionEvent::TimerExpired));
    }

    #[test]
    fn stale_round_start_clamps_to_zero() {
        let (mut state, _rx, events, _) = peer();
        state.handle_message(Message::RoundStart(round(0, 5_000)), 9_000);
        assert!(
            events
                .drain()
                .contains(&SessionEvent::CountdownStarted { remaining_ms: 0 })
        );
        state.tick(9_000);
        assert_eq!(state.phase(), Phase::Scoring);
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (mut state, rx, _events, _) = peer();
        state.handle_message(Message::Ping { timestamp: 5 }, 1_234);
        assert_eq!(
            sent(&rx),
            vec![Message::Pong {
                name: "P1".into(),
                timestamp: 1_234
            }]
        );
    }

    #[test]
    fn mirrors_follow_host_broadcasts() {
        let (mut state, _rx, _events, store) = peer();
        state.handle_message(
            Message::RosterUpdate {
                names: vec!["H".into(), "P1".into()],
                pending: vec!["P2".into()],
            },
            0,
        );
        state.handle_message(Message::GameStart(GameConfig::default()), 0);
        state.handle_message(Message::GameConfigUpdate { paper_mode: true }, 0);
        state.handle_message(Message::RoundStart(round(0, 60_000)), 10);
        state.handle_message(Message::TimerEnd, 20);
        assert_eq!(state.phase(), Phase::Scoring);
        state.handle_message(
            Message::AllScores {
                results: vec![PlayerResult {
                    name: "H".into(),
                    score: 3,
                    answers: vec![],
                }],
                letter: "S".into(),
                list_name: "Lista 4".into(),
                list_id: 4,
                version_id: "v".into(),
            },
            30,
        );

        let view = state.view();
        assert_eq!(view.phase, Phase::Lobby);
        assert_eq!(view.roster, ["H", "P1"]);
        assert_eq!(view.pending, ["P2"]);
        assert!(view.game_config.unwrap().paper_mode);
        assert_eq!(view.round.unwrap().letter, "S");
        assert_eq!(store.load_in_progress_game().unwrap().rounds.len(), 1);
    }

    #[test]
    fn sync_response_repopulates_mirrors() {
        let (mut state, _rx, _events, _) = peer();
        state.handle_message(
            Message::SyncResponse {
                phase: Phase::Scoring,
                roster: vec!["H".into(), "P1".into()],
                game_config: Some(GameConfig::default()),
            },
            0,
        );
        let view = state.view();
        assert_eq!(view.phase, Phase::Scoring);
        assert_eq!(view.roster, ["H", "P1"]);
        assert!(view.game_config.is_some());
    }

    #[test]
    fn queued_resync_waits_in_lobby_until_game_start() {
        let (mut state, _rx, _events, _) = peer();
        state.handle_message(
            Message::SyncResponse {
                phase: Phase::RoundActive,
                roster: vec!["H".into(), "P2".into()],
                game_config: Some(GameConfig::default()),
            },
            0,
        );
        assert_eq!(state.phase(), Phase::RoundActive);

        state.handle_message(
            Message::RosterUpdate {
                names: vec!["H".into(), "P2".into()],
                pending: vec!["P1".into()],
            },
            10,
        );
        assert_eq!(state.phase(), Phase::Lobby);
        assert!(state.submit_score(3, vec![]).is_err());

        state.handle_message(
            Message::RosterUpdate {
                names: vec!["H".into(), "P2".into(), "P1".into()],
                pending: vec![],
            },
            20,
        );
        assert_eq!(state.phase(), Phase::Lobby);
    }

    #[test]
    fn game_start_resets_a_stale_round_phase() {
        let (mut state, _rx, _events, _) = peer();
        state.handle_message(Message::RoundStart(round(0, 60_000)), 0);
        assert_eq!(state.phase(), Phase::RoundActive);
        state.handle_message(Message::GameStart(GameConfig::default()), 100);
        assert_eq!(state.phase(), Phase::Lobby);
        assert!(state.submit_score(3, vec![]).is_err());
        // The cleared countdown no longer fires.
        state.tick(70_000);
        assert_eq!(state.phase(), Phase::Lobby);
    }

    #[test]
    fn submit_only_during_round() {
        let (mut state, rx, _events, _) = peer();
        assert!(state.submit_score(1, vec![]).is_err());
        state.handle_message(Message::RoundStart(round(0, 1_000)), 0);
        state.submit_score(8, vec!["Sapo".into()]).unwrap();
        assert_eq!(
            sent(&rx),
            vec![Message::ScoreSubmit {
                name: "P1".into(),
                score: 8,
                answers: vec!["Sapo".into()],
            }]
        );
    }

    #[test]
    fn connection_lost_only_reported_before_finalize() {
        let (mut state, _rx, events, _) = peer();
        state.connection_lost();
        assert_eq!(events.drain(), vec![SessionEvent::ConnectionLost]);

        state.handle_message(Message::GameFinalize, 0);
        events.drain();
        state.connection_lost();
        assert!(events.drain().is_empty());
        assert_eq!(state.phase(), Phase::Terminated);
    }

    #[test]
    fn send_fails_after_writer_is_gone() {
        let (state, rx, _events, _) = peer();
        drop(rx);
        assert!(matches!(state.request_sync(), Err(SessionError::Closed)));
    }
}
