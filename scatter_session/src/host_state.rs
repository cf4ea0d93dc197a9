// Host-side session state, driven by the host actor.
//
// `HostState` is the single writer for everything shared across devices:
// the roster and reconnection queue, per-name heartbeat ages, the round
// lifecycle, the score barrier and the Host's own round timer. It performs no
// socket I/O; outbound frames are queued on each connection's `Outbox`, and
// time arrives as explicit `now_ms` arguments. That makes every protocol rule
// testable without threads or sockets (see the tests at the bottom).
//
// Connections and names are separate: a connection is bound to a name by its
// first JOIN. Until then it receives nothing and everything it sends except
// JOIN is dropped. Routing:
// - Session-level messages (`Message::is_session_level`) go to every bound
//   connection, including players waiting in the reconnection queue.
// - Game-level messages go to roster members only.
// - Every broadcast except PING is also published on the local event bus, so
//   the Host UI consumes the same stream as the Peers.
//
// A JOIN for a name already bound to another connection is the same player
// reconnecting before its old socket was noticed as dead: the old connection
// is dropped and the name is rebound, keeping its roster slot.
//
// Removal (socket close, heartbeat expiry or ROUND_ABANDONED) always goes
// through `remove_player`, which also discards any held score submission and
// re-checks the barrier, so a departure can complete a release.

use std::collections::BTreeMap;
use std::sync::Arc;

use scatter_protocol::{
    GameConfig, Message, Phase, PlayerResult, Role, RoundContext, RoundParams, encode,
};
use tracing::{debug, info, trace, warn};

use crate::barrier::{ScoreBarrier, ScoreSubmission, SubmitOutcome};
use crate::config::{MidRoundPolicy, SessionConfig};
use crate::error::{Result, SessionError};
use crate::events::{EventBus, SessionEvent};
use crate::heartbeat::HeartbeatMonitor;
use crate::roster::{Admission, Roster};
use crate::round::RoundLifecycle;
use crate::storage::{GameStore, RoundResult};
use crate::timer::{RoundTimer, TimerTick};
use crate::transport::Outbox;
use crate::view::{SessionView, SharedView};

/// Identifies one accepted TCP connection for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    name: Option<String>,
    outbox: Outbox,
}

pub struct HostState {
    self_name: String,
    connections: BTreeMap<ConnectionId, Connection>,
    roster: Roster,
    heartbeat: HeartbeatMonitor,
    round: RoundLifecycle,
    barrier: ScoreBarrier,
    timer: Option<RoundTimer>,
    policy: MidRoundPolicy,
    max_players: usize,
    bus: EventBus,
    store: Arc<dyn GameStore>,
    view: SharedView,
}

impl HostState {
    pub fn new(
        self_name: &str,
        config: &SessionConfig,
        bus: EventBus,
        store: Arc<dyn GameStore>,
    ) -> Self {
        let state = Self {
            self_name: self_name.to_owned(),
            connections: BTreeMap::new(),
            roster: Roster::new(self_name),
            heartbeat: HeartbeatMonitor::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            round: RoundLifecycle::new(),
            barrier: ScoreBarrier::new(),
            timer: None,
            policy: config.mid_round_policy,
            max_players: config.max_players,
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
            role: Role::Host,
            self_name: self.self_name.clone(),
            phase: self.round.phase(),
            roster: self.roster.members().to_vec(),
            pending: self.roster.pending().to_vec(),
            game_config: self.round.game_config().cloned(),
            round: self.round.round().cloned(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.round.phase()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn sync_view(&self) {
        self.view.set(self.view());
    }

    fn publish(&self, event: SessionEvent) {
        self.sync_view();
        self.bus.publish(event);
    }

    // ---------------------------------------------------------------------
    // Transport events
    // ---------------------------------------------------------------------

    pub fn accept(&mut self, conn: ConnectionId, outbox: Outbox) {
        debug!(%conn, peer = outbox.label(), "connection accepted");
        self.connections.insert(conn, Connection { name: None, outbox });
    }

    pub fn handle_closed(&mut self, conn: ConnectionId, now_ms: u64) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        debug!(%conn, "connection closed");
        if let Some(name) = connection.name {
            self.remove_player(&name, "disconnected", now_ms);
        }
    }

    pub fn handle_message(&mut self, conn: ConnectionId, message: Message, now_ms: u64) {
        let Some(connection) = self.connections.get(&conn) else {
            trace!(%conn, tag = message.tag(), "message from dropped connection");
            return;
        };
        match (connection.name.clone(), message) {
            (None, Message::Join { name }) => self.join(conn, name, now_ms),
            (None, other) => {
                warn!(%conn, tag = other.tag(), "message before JOIN, dropping");
            }
            (Some(name), message) => self.handle_bound(&name, message, now_ms),
        }
    }

    fn handle_bound(&mut self, name: &str, message: Message, now_ms: u64) {
        trace!(name, tag = message.tag(), "inbound");
        self.publish(SessionEvent::Message(message.clone()));
        match message {
            Message::Pong { .. } => {
                self.heartbeat.record_pong(name, now_ms);
            }
            Message::ScoreSubmit {
                name: claimed,
                score,
                answers,
            } => {
                if claimed != name {
                    warn!(name, claimed = %claimed, "score submitted under another name, using connection's name");
                }
                if let Err(e) = self.accept_submission(name, score, answers, true, now_ms) {
                    warn!(name, error = %e, "ignoring score submission");
                }
            }
            Message::RequestSync { .. } => {
                // A queued player is not part of the running round.
                let phase = if self.roster.is_pending(name) {
                    Phase::Lobby
                } else {
                    self.round.phase()
                };
                let response = Message::SyncResponse {
                    phase,
                    roster: self.roster.members().to_vec(),
                    game_config: self.round.game_config().cloned(),
                };
                self.unicast(name, &response);
            }
            Message::RoundAbandoned => {
                self.remove_player(name, "abandoned", now_ms);
            }
            Message::ReturnToWaiting | Message::GameFinalize => {}
            Message::Join { .. } => {
                debug!(name, "repeated JOIN on bound connection ignored");
            }
            other => {
                warn!(name, tag = other.tag(), "unexpected message from peer");
            }
        }
    }

    fn join(&mut self, conn: ConnectionId, name: String, now_ms: u64) {
        if let Some(reason) = self.refusal_reason(&name) {
            info!(%conn, name = %name, reason = %reason, "join refused");
            if let Some(connection) = self.connections.remove(&conn) {
                connection.outbox.send(&Message::JoinRefused { reason });
            }
            return;
        }

        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(id, c)| **id != conn && c.name.as_deref() == Some(name.as_str()))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            info!(name = %name, old = %id, new = %conn, "player reconnected, dropping old connection");
            self.connections.remove(&id);
        }

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.name = Some(name.clone());
        }
        self.heartbeat.seed(&name, now_ms);

        let phase = self.round.phase();
        let rejoined = self.roster.is_member(&name);
        let admission = self.roster.admit(&name, phase, self.round.config_sent());
        info!(name = %name, ?phase, ?admission, rejoined, "player joined");
        self.broadcast_roster();
        match admission {
            Admission::Admitted => {}
            Admission::Queued { deliver_now: true } => {
                self.flush_pending();
                // Still a member, so the flush skipped it.
                if rejoined {
                    if let Some(config) = self.round.game_config().cloned() {
                        self.unicast(&name, &Message::GameStart(config));
                    }
                }
            }
            Admission::Queued { deliver_now: false } => {
                if self.policy == MidRoundPolicy::ShareCurrentRound
                    && phase == Phase::RoundActive
                {
                    self.share_current_round(&name);
                } else if rejoined {
                    let discarded = self.barrier.discard(&name);
                    debug!(name = %name, discarded_submission = discarded, "rejoining member requeued");
                    self.check_barrier(now_ms);
                }
            }
        }
    }

    fn refusal_reason(&self, name: &str) -> Option<String> {
        if name.trim().is_empty() {
            return Some("name must not be empty".into());
        }
        if name == self.self_name {
            return Some(format!("name {name:?} is already taken"));
        }
        if !self.roster.knows(name) && self.roster.occupancy() >= self.max_players {
            return Some(format!("session is full ({} players)", self.max_players));
        }
        None
    }

    /// Promote a mid-round joiner into the running round.
    fn share_current_round(&mut self, name: &str) {
        if !self.roster.promote(name) {
            return;
        }
        info!(name, "sharing current round with late joiner");
        if let Some(config) = self.round.game_config().cloned() {
            self.unicast(name, &Message::GameStart(config));
        }
        if let Some(ctx) = self.round.round().cloned() {
            self.unicast(name, &Message::RoundStart(ctx));
        }
        self.broadcast_roster();
    }

    /// Promote every queued name: each gets GAME_START, then the new roster
    /// goes out.
    fn flush_pending(&mut self) {
        let promoted = self.roster.promote_pending();
        if promoted.is_empty() {
            return;
        }
        info!(names = ?promoted, "promoting pending players");
        if let Some(config) = self.round.game_config().cloned() {
            for name in &promoted {
                self.unicast(name, &Message::GameStart(config.clone()));
            }
        }
        self.broadcast_roster();
    }

    fn remove_player(&mut self, name: &str, reason: &str, now_ms: u64) {
        let known = self.roster.remove(name);
        self.heartbeat.forget(name);
        let discarded = self.barrier.discard(name);
        let before = self.connections.len();
        self.connections
            .retain(|_, c| c.name.as_deref() != Some(name));
        if !known && before == self.connections.len() {
            return;
        }
        info!(name, reason, discarded_submission = discarded, "player removed");
        self.broadcast_roster();
        self.broadcast(Message::PlayerLeft {
            name: name.to_owned(),
        });
        self.check_barrier(now_ms);
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Heartbeat probing, expiry and the Host's round timer.
    pub fn tick(&mut self, now_ms: u64) {
        if self.round.phase() == Phase::Terminated {
            return;
        }
        if self.heartbeat.probe_due(now_ms) {
            for name in self.heartbeat.expired(now_ms) {
                warn!(name = %name, "heartbeat timeout");
                self.remove_player(&name, "heartbeat timeout", now_ms);
            }
            if self.connections.values().any(|c| c.name.is_some()) {
                self.broadcast(Message::Ping { timestamp: now_ms });
            }
        }

        let tick = self.timer.as_mut().and_then(|t| t.poll(now_ms));
        match tick {
            Some(TimerTick::Warning { remaining_ms }) => {
                self.publish(SessionEvent::TimerWarning { remaining_ms });
            }
            Some(TimerTick::Expired) => {
                info!("round timer expired");
                self.publish(SessionEvent::TimerExpired);
                if self.round.phase() == Phase::RoundActive {
                    if let Err(e) = self.end_round() {
                        warn!(error = %e, "could not end round on expiry");
                    }
                }
            }
            None => {}
        }
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    pub fn start_game(&mut self, config: GameConfig) -> Result<()> {
        self.round.start_game(config.clone())?;
        info!(paper_mode = config.paper_mode, "game started");
        self.broadcast(Message::GameStart(config));
        Ok(())
    }

    pub fn update_paper_mode(&mut self, paper_mode: bool) -> Result<()> {
        self.round.set_paper_mode(paper_mode)?;
        self.broadcast(Message::GameConfigUpdate { paper_mode });
        Ok(())
    }

    pub fn start_round(&mut self, params: RoundParams, now_ms: u64) -> Result<RoundContext> {
        let ctx = self.round.start_round(params, now_ms)?;
        self.flush_pending();
        self.barrier.clear();
        let warning = self
            .round
            .game_config()
            .and_then(GameConfig::warning_threshold_ms);
        self.timer = Some(RoundTimer::start(now_ms, ctx.timer_duration_ms, warning));
        info!(letter = %ctx.letter, list_id = ctx.list_id, duration_ms = ctx.timer_duration_ms, "round started");
        self.broadcast(Message::RoundStart(ctx.clone()));
        self.publish(SessionEvent::CountdownStarted {
            remaining_ms: ctx.timer_duration_ms,
        });
        Ok(ctx)
    }

    /// Move the shared phase to Scoring. Natural expiry and a manual early
    /// end both come through here.
    pub fn end_round(&mut self) -> Result<()> {
        self.round.end_round()?;
        self.timer = None;
        info!("round ended");
        self.broadcast(Message::TimerEnd);
        Ok(())
    }

    pub fn submit_local(&mut self, score: i32, answers: Vec<String>, now_ms: u64) -> Result<()> {
        let name = self.self_name.clone();
        self.accept_submission(&name, score, answers, false, now_ms)
    }

    fn accept_submission(
        &mut self,
        name: &str,
        score: i32,
        answers: Vec<String>,
        from_peer: bool,
        now_ms: u64,
    ) -> Result<()> {
        let phase = self.round.phase();
        if !phase.is_round_in_progress() {
            return Err(SessionError::InvalidPhase {
                phase,
                operation: "submit_score",
            });
        }
        let outcome = self.barrier.submit(
            self.roster.members(),
            name,
            ScoreSubmission { score, answers },
        );
        if outcome == SubmitOutcome::NotInRoster {
            warn!(name, "submission from a player outside the roster ignored");
            return Ok(());
        }
        info!(name, score, ?outcome, held = self.barrier.len(), target = self.roster.len(), "score submitted");
        if from_peer {
            self.unicast(
                name,
                &Message::ScoreAck {
                    name: name.to_owned(),
                },
            );
        }
        self.check_barrier(now_ms);
        Ok(())
    }

    fn check_barrier(&mut self, now_ms: u64) {
        if self.round.phase().is_round_in_progress()
            && self.barrier.is_complete(self.roster.members())
        {
            self.release(now_ms);
        }
    }

    /// Release whatever the barrier holds even if some members have not
    /// submitted.
    pub fn force_release(&mut self, now_ms: u64) -> Result<()> {
        let phase = self.round.phase();
        if !phase.is_round_in_progress() {
            return Err(SessionError::InvalidPhase {
                phase,
                operation: "force_release",
            });
        }
        warn!(held = self.barrier.len(), target = self.roster.len(), "forcing score release");
        self.release(now_ms);
        Ok(())
    }

    fn release(&mut self, now_ms: u64) {
        let results = self.barrier.release(self.roster.members());
        if let Err(e) = self.round.finish_round() {
            warn!(error = %e, "release outside a round");
            return;
        }
        self.timer = None;
        let Some(ctx) = self.round.round().cloned() else {
            return;
        };
        info!(players = results.len(), letter = %ctx.letter, "scores released");
        self.persist(&ctx, &results, now_ms);
        self.broadcast(Message::AllScores {
            results,
            letter: ctx.letter,
            list_name: ctx.list_name,
            list_id: ctx.list_id,
            version_id: ctx.version_id,
        });
        self.flush_pending();
    }

    fn persist(&self, ctx: &RoundContext, results: &[PlayerResult], now_ms: u64) {
        let result = RoundResult {
            letter: ctx.letter.clone(),
            list_id: ctx.list_id,
            version_id: ctx.version_id.clone(),
            list_name: ctx.list_name.clone(),
            results: results.to_vec(),
            finished_at: now_ms,
        };
        if let Err(e) = self.store.persist_round_result(&result) {
            warn!(error = %e, "failed to persist round result");
        }
    }

    pub fn return_to_waiting(&mut self) -> Result<()> {
        let phase = self.round.phase();
        if phase != Phase::Lobby {
            return Err(SessionError::InvalidPhase {
                phase,
                operation: "return_to_waiting",
            });
        }
        self.broadcast(Message::ReturnToWaiting);
        Ok(())
    }

    /// Send GAME_FINALIZE, close every connection and terminate.
    pub fn finalize(&mut self) -> Result<()> {
        let phase = self.round.phase();
        if phase == Phase::Terminated {
            return Err(SessionError::InvalidPhase {
                phase,
                operation: "finalize",
            });
        }
        self.broadcast(Message::GameFinalize);
        if let Err(e) = self.store.finalize_game() {
            debug!(error = %e, "nothing to finalize in store");
        }
        self.round.terminate();
        self.close_all();
        info!("game finalized");
        self.sync_view();
        Ok(())
    }

    /// Drop every connection. Writers flush what is queued, then close.
    pub fn close_all(&mut self) {
        self.connections.clear();
        self.heartbeat.clear();
        self.barrier.clear();
        self.timer = None;
    }

    /// Route an application-supplied message by the normal routing rules.
    pub fn send(&mut self, message: Message) {
        self.broadcast(message);
    }

    // ---------------------------------------------------------------------
    // Routing
    // ---------------------------------------------------------------------

    fn broadcast_roster(&mut self) {
        self.broadcast(Message::RosterUpdate {
            names: self.roster.members().to_vec(),
            pending: self.roster.pending().to_vec(),
        });
    }

    fn broadcast(&mut self, message: Message) {
        // Peers may query the Host right after receiving this.
        self.sync_view();
        let bytes = match encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(tag = message.tag(), error = %e, "failed to encode broadcast");
                return;
            }
        };
        let session_level = message.is_session_level();
        for connection in self.connections.values() {
            let Some(name) = connection.name.as_deref() else {
                continue;
            };
            if session_level || self.roster.is_member(name) {
                connection.outbox.send_bytes(bytes.clone());
            }
        }
        trace!(tag = message.tag(), "broadcast");
        if !matches!(message, Message::Ping { .. }) {
            self.publish(SessionEvent::Message(message));
        }
    }

    fn unicast(&self, name: &str, message: &Message) -> bool {
        let sent = self
            .connections
            .values()
            .find(|c| c.name.as_deref() == Some(name))
            .is_some_and(|c| c.outbox.send(message));
        if !sent {
            debug!(name, tag = message.tag(), "unicast target not connected");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver, TryRecvError};

    use scatter_protocol::Framer;

    use crate::events::Subscription;
    use crate::storage::MemoryStore;

    struct FakePeer {
        conn: ConnectionId,
        rx: Receiver<Vec<u8>>,
        framer: Framer,
    }

    impl FakePeer {
        fn drain(&mut self) -> Vec<Message> {
            let chunks: Vec<Vec<u8>> = self.rx.try_iter().collect();
            let mut messages = Vec::new();
            for chunk in chunks {
                messages.extend(self.framer.feed::<Message>(&chunk));
            }
            messages
        }

        /// Discards anything still queued.
        fn is_closed(&self) -> bool {
            loop {
                match self.rx.try_recv() {
                    Ok(_) => continue,
                    Err(TryRecvError::Empty) => return false,
                    Err(TryRecvError::Disconnected) => return true,
                }
            }
        }
    }

    struct Harness {
        host: HostState,
        store: Arc<MemoryStore>,
        events: Subscription,
        next_conn: u64,
    }

    fn config() -> SessionConfig {
        SessionConfig {
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            ..SessionConfig::default()
        }
    }

    fn harness_with(config: SessionConfig) -> Harness {
        let bus = EventBus::new(1024);
        let events = bus.subscribe();
        let store = Arc::new(MemoryStore::new());
        let host = HostState::new("H", &config, bus, store.clone());
        Harness {
            host,
            store,
            events,
            next_conn: 0,
        }
    }

    fn harness() -> Harness {
        harness_with(config())
    }

    impl Harness {
        fn connect(&mut self) -> FakePeer {
            self.next_conn += 1;
            let conn = ConnectionId(self.next_conn);
            let (tx, rx) = mpsc::channel();
            self.host.accept(conn, Outbox::new(conn.to_string(), tx));
            FakePeer {
                conn,
                rx,
                framer: Framer::new(),
            }
        }

        fn join(&mut self, name: &str, now_ms: u64) -> FakePeer {
            let peer = self.connect();
            self.host.handle_message(
                peer.conn,
                Message::Join { name: name.into() },
                now_ms,
            );
            peer
        }

        fn submit(&mut self, peer: &FakePeer, name: &str, score: i32, now_ms: u64) {
            self.host.handle_message(
                peer.conn,
                Message::ScoreSubmit {
                    name: name.into(),
                    score,
                    answers: vec![format!("{name}-answer")],
                },
                now_ms,
            );
        }

        fn published(&self) -> Vec<Message> {
            self.events
                .drain()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::Message(m) => Some(m),
                    _ => None,
                })
                .collect()
        }
    }

    fn params() -> RoundParams {
        RoundParams {
            letter: "M".into(),
            list_id: 3,
            version_id: "original_1988".into(),
            list_name: "Lista 3".into(),
            categories: vec!["Fruta".into(), "País".into()],
            timer_duration_ms: 60_000,
        }
    }

    fn roster_updates(messages: &[Message]) -> Vec<(Vec<String>, Vec<String>)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::RosterUpdate { names, pending } => Some((names.clone(), pending.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn lobby_join_admits_into_roster() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);

        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert!(h.host.roster().pending().is_empty());
        let got = p1.drain();
        assert_eq!(
            roster_updates(&got),
            vec![(vec!["H".to_string(), "P1".to_string()], vec![])]
        );
    }

    #[test]
    fn mid_round_join_is_queued_and_roster_still_broadcast() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 1_000).unwrap();
        p1.drain();

        let mut p2 = h.join("P2", 2_000);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert_eq!(h.host.roster().pending(), ["P2"]);

        let expected = (
            vec!["H".to_string(), "P1".to_string()],
            vec!["P2".to_string()],
        );
        assert_eq!(roster_updates(&p1.drain()), vec![expected.clone()]);
        // The queued player sees the roster but no game traffic.
        let p2_msgs = p2.drain();
        assert_eq!(roster_updates(&p2_msgs), vec![expected]);
        assert!(!p2_msgs.iter().any(|m| matches!(m, Message::RoundStart(_))));
    }

    #[test]
    fn release_promotes_pending_and_sends_game_start() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 1_000).unwrap();
        let mut p2 = h.join("P2", 2_000);
        p1.drain();
        p2.drain();
        h.published();

        h.host.submit_local(7, vec!["Mango".into()], 3_000).unwrap();
        assert_eq!(h.host.phase(), Phase::RoundActive);
        h.submit(&p1, "P1", 5, 3_100);

        assert_eq!(h.host.phase(), Phase::Lobby);
        assert_eq!(h.host.roster().members(), ["H", "P1", "P2"]);
        assert!(h.host.roster().pending().is_empty());

        let p1_msgs = p1.drain();
        assert!(matches!(&p1_msgs[0], Message::ScoreAck { name } if name == "P1"));
        let all_scores = p1_msgs
            .iter()
            .find_map(|m| match m {
                Message::AllScores { results, letter, .. } => Some((results.clone(), letter.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(all_scores.1, "M");
        let names: Vec<&str> = all_scores.0.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["H", "P1"]);

        let p2_msgs = p2.drain();
        assert!(
            !p2_msgs.iter().any(|m| matches!(m, Message::AllScores { .. })),
            "pending player must not see the released scores"
        );
        assert!(matches!(p2_msgs[0], Message::GameStart(_)), "{p2_msgs:?}");
        let last_roster = roster_updates(&p2_msgs).pop().unwrap();
        assert_eq!(last_roster.0, ["H", "P1", "P2"]);

        let game = h.store.load_in_progress_game().unwrap();
        assert_eq!(game.rounds.len(), 1);
        assert!(h.published().iter().any(|m| matches!(m, Message::AllScores { .. })));
    }

    #[test]
    fn silent_peer_is_removed_after_heartbeat_timeout() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);

        let mut now = 0;
        while now <= 40_000 && h.host.roster().len() == 2 {
            h.host.tick(now);
            now += 100;
        }
        assert_eq!(h.host.roster().members(), ["H"]);
        assert!(now > 30_000 && now <= 40_100, "removed at {now}");

        let msgs = p1.drain();
        assert!(msgs.iter().any(|m| matches!(m, Message::Ping { .. })));
        assert!(p1.is_closed());
        let published = h.published();
        assert!(published.contains(&Message::PlayerLeft { name: "P1".into() }));
    }

    #[test]
    fn pong_keeps_peer_alive() {
        let mut h = harness();
        let p1 = h.join("P1", 0);
        for now in (0..=100_000).step_by(1_000) {
            h.host.tick(now);
            h.host.handle_message(
                p1.conn,
                Message::Pong {
                    name: "P1".into(),
                    timestamp: now,
                },
                now,
            );
        }
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
    }

    #[test]
    fn departure_completes_barrier() {
        let mut h = harness();
        let p1 = h.join("P1", 0);
        let p2 = h.join("P2", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        h.host.submit_local(1, vec![], 10).unwrap();
        h.submit(&p1, "P1", 2, 20);
        assert_eq!(h.host.phase(), Phase::RoundActive);

        h.host.handle_closed(p2.conn, 30);
        assert_eq!(h.host.phase(), Phase::Lobby);
        let game = h.store.load_in_progress_game().unwrap();
        assert_eq!(game.rounds[0].results.len(), 2);
    }

    #[test]
    fn departed_submitter_does_not_count() {
        let mut h = harness();
        let p1 = h.join("P1", 0);
        let p2 = h.join("P2", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        h.submit(&p1, "P1", 2, 10);
        h.submit(&p2, "P2", 3, 10);
        h.host.handle_closed(p1.conn, 20);
        // H still missing.
        assert_eq!(h.host.phase(), Phase::RoundActive);
        h.host.submit_local(4, vec![], 30).unwrap();
        assert_eq!(h.host.phase(), Phase::Lobby);
        let results = &h.store.load_in_progress_game().unwrap().rounds[0].results;
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["H", "P2"]);
    }

    #[test]
    fn force_release_with_missing_submissions() {
        let mut h = harness();
        let _p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        h.host.submit_local(4, vec![], 10).unwrap();
        h.host.force_release(20).unwrap();
        assert_eq!(h.host.phase(), Phase::Lobby);
        assert!(h.host.force_release(30).is_err());
    }

    #[test]
    fn natural_expiry_broadcasts_timer_end() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 1_000).unwrap();
        p1.drain();
        h.events.drain();

        h.host.handle_message(
            p1.conn,
            Message::Pong {
                name: "P1".into(),
                timestamp: 60_000,
            },
            60_000,
        );
        h.host.tick(61_000);
        assert_eq!(h.host.phase(), Phase::Scoring);
        assert!(p1.drain().contains(&Message::TimerEnd));
        let events = h.events.drain();
        assert!(events.contains(&SessionEvent::TimerExpired));
        assert!(events.contains(&SessionEvent::Message(Message::TimerEnd)));
    }

    #[test]
    fn manual_end_uses_same_broadcast_and_stops_timer() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        p1.drain();
        h.host.end_round().unwrap();
        assert_eq!(p1.drain(), vec![Message::TimerEnd]);
        h.events.drain();
        h.host.tick(70_000);
        assert!(!h.events.drain().contains(&SessionEvent::TimerExpired));
    }

    #[test]
    fn warning_published_when_enabled() {
        let mut h = harness();
        h.host
            .start_game(GameConfig {
                warning_enabled: true,
                warning_seconds: 10,
                ..GameConfig::default()
            })
            .unwrap();
        h.host.start_round(params(), 0).unwrap();
        h.events.drain();
        h.host.tick(49_000);
        assert!(h.events.drain().is_empty());
        h.host.tick(50_500);
        assert!(
            h.events
                .drain()
                .contains(&SessionEvent::TimerWarning { remaining_ms: 9_500 })
        );
    }

    #[test]
    fn lobby_join_after_game_start_gets_config_immediately() {
        let mut h = harness();
        h.host.start_game(GameConfig::default()).unwrap();
        let mut p1 = h.join("P1", 0);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        let msgs = p1.drain();
        assert!(msgs.contains(&Message::GameStart(GameConfig::default())));
        let updates = roster_updates(&msgs);
        assert_eq!(updates.first().unwrap().1, ["P1"]);
        assert_eq!(updates.last().unwrap().0, ["H", "P1"]);
    }

    #[test]
    fn share_current_round_policy_sends_round_to_late_joiner() {
        let mut h = harness_with(SessionConfig {
            mid_round_policy: MidRoundPolicy::ShareCurrentRound,
            ..config()
        });
        h.host.start_game(GameConfig::default()).unwrap();
        let ctx = h.host.start_round(params(), 5_000).unwrap();
        let mut p1 = h.join("P1", 8_000);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        let msgs = p1.drain();
        assert!(msgs.contains(&Message::RoundStart(ctx)));
    }

    #[test]
    fn refuses_host_name_empty_name_and_full_session() {
        let mut h = harness_with(SessionConfig {
            max_players: 2,
            ..config()
        });
        let mut dup = h.join("H", 0);
        match dup.drain().as_slice() {
            [Message::JoinRefused { .. }] => {}
            other => panic!("expected JoinRefused, got {other:?}"),
        }
        assert!(dup.is_closed());

        let mut empty = h.join("  ", 0);
        assert!(matches!(empty.drain()[0], Message::JoinRefused { .. }));

        let _p1 = h.join("P1", 0);
        let mut p2 = h.join("P2", 0);
        assert!(matches!(p2.drain()[0], Message::JoinRefused { .. }));
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert_eq!(h.host.connection_count(), 1);
    }

    #[test]
    fn rejoin_with_same_name_replaces_old_connection() {
        let mut h = harness();
        let old = h.join("P1", 0);
        let mut new = h.join("P1", 100);
        assert!(old.is_closed());
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert_eq!(h.host.connection_count(), 1);
        // The late close of the old socket must not remove the player.
        h.host.handle_closed(old.conn, 200);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert!(!roster_updates(&new.drain()).is_empty());
    }

    #[test]
    fn rejoin_mid_round_requeues_and_barrier_releases_without_rejoiner() {
        let mut h = harness();
        let p1 = h.join("P1", 0);
        let mut p2 = h.join("P2", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 1_000).unwrap();
        h.submit(&p1, "P1", 9, 1_500);

        let mut new = h.join("P1", 2_000);
        assert!(p1.is_closed());
        assert_eq!(h.host.roster().members(), ["H", "P2"]);
        assert_eq!(h.host.roster().pending(), ["P1"]);
        p2.drain();
        let rejoin_msgs = new.drain();
        assert!(!rejoin_msgs.iter().any(|m| matches!(m, Message::RoundStart(_))));

        // The held submission from the dropped socket no longer counts.
        h.host.submit_local(7, Vec::new(), 3_000).unwrap();
        assert_eq!(h.host.phase(), Phase::RoundActive);
        h.submit(&p2, "P2", 5, 3_100);
        assert_eq!(h.host.phase(), Phase::Lobby);
        assert_eq!(h.host.roster().members(), ["H", "P2", "P1"]);

        let names = p2
            .drain()
            .into_iter()
            .find_map(|m| match m {
                Message::AllScores { results, .. } => {
                    Some(results.into_iter().map(|r| r.name).collect::<Vec<_>>())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(names, ["H", "P2"]);
        let rejoin_msgs = new.drain();
        assert!(!rejoin_msgs.iter().any(|m| matches!(m, Message::AllScores { .. })));
        assert!(matches!(rejoin_msgs[0], Message::GameStart(_)), "{rejoin_msgs:?}");
    }

    #[test]
    fn rejoin_during_scoring_releases_once_the_rest_submit() {
        let mut h = harness();
        let _p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        h.host.submit_local(4, Vec::new(), 100).unwrap();
        h.host.end_round().unwrap();
        assert_eq!(h.host.phase(), Phase::Scoring);

        // Only the host remains a member and it already submitted.
        let _new = h.join("P1", 200);
        assert_eq!(h.host.phase(), Phase::Lobby);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
    }

    #[test]
    fn rejoin_in_configured_lobby_resends_game_start() {
        let mut h = harness();
        let mut old = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        assert!(old.drain().iter().any(|m| matches!(m, Message::GameStart(_))));

        let mut new = h.join("P1", 100);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert!(h.host.roster().pending().is_empty());
        let got = new.drain();
        assert!(
            got.iter().any(|m| *m == Message::GameStart(GameConfig::default())),
            "{got:?}"
        );
    }

    #[test]
    fn rejoin_mid_round_under_share_policy_gets_round_again() {
        let mut h = harness_with(SessionConfig {
            mid_round_policy: MidRoundPolicy::ShareCurrentRound,
            ..config()
        });
        let _old = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        let ctx = h.host.start_round(params(), 1_000).unwrap();

        let mut new = h.join("P1", 2_000);
        assert_eq!(h.host.roster().members(), ["H", "P1"]);
        assert!(h.host.roster().pending().is_empty());
        let got = new.drain();
        assert!(got.iter().any(|m| *m == Message::RoundStart(ctx.clone())), "{got:?}");

        h.host.submit_local(1, Vec::new(), 3_000).unwrap();
        h.submit(&new, "P1", 2, 3_100);
        assert_eq!(h.host.phase(), Phase::Lobby);
    }

    #[test]
    fn messages_before_join_are_dropped() {
        let mut h = harness();
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        let mut anon = h.connect();
        h.host.handle_message(
            anon.conn,
            Message::ScoreSubmit {
                name: "H".into(),
                score: 99,
                answers: vec![],
            },
            10,
        );
        assert!(anon.drain().is_empty());
        h.host.tick(11);
        // Unbound connections do not receive PINGs either.
        assert!(anon.drain().is_empty());
        assert_eq!(h.host.phase(), Phase::RoundActive);
    }

    #[test]
    fn request_sync_gets_unicast_response() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);
        let mut p2 = h.join("P2", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        p1.drain();
        p2.drain();
        h.host
            .handle_message(p1.conn, Message::RequestSync { name: "P1".into() }, 10);
        match p1.drain().as_slice() {
            [Message::SyncResponse {
                phase,
                roster,
                game_config,
            }] => {
                assert_eq!(*phase, Phase::Lobby);
                assert_eq!(roster, &["H", "P1", "P2"]);
                assert!(game_config.is_some());
            }
            other => panic!("expected SyncResponse, got {other:?}"),
        }
        assert!(p2.drain().is_empty());
    }

    #[test]
    fn request_sync_from_queued_player_reports_lobby() {
        let mut h = harness();
        let _p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 1_000).unwrap();
        let mut late = h.join("P2", 2_000);
        late.drain();

        h.host
            .handle_message(late.conn, Message::RequestSync { name: "P2".into() }, 2_100);
        match late.drain().as_slice() {
            [Message::SyncResponse { phase, roster, .. }] => {
                assert_eq!(*phase, Phase::Lobby);
                assert_eq!(roster, &["H", "P1"]);
            }
            other => panic!("expected SyncResponse, got {other:?}"),
        }
        assert_eq!(h.host.phase(), Phase::RoundActive);
    }

    #[test]
    fn round_abandoned_removes_sender() {
        let mut h = harness();
        let p1 = h.join("P1", 0);
        let mut p2 = h.join("P2", 0);
        p2.drain();
        h.host.handle_message(p1.conn, Message::RoundAbandoned, 10);
        assert_eq!(h.host.roster().members(), ["H", "P2"]);
        assert!(p2.drain().contains(&Message::PlayerLeft { name: "P1".into() }));
    }

    #[test]
    fn round_requires_game_start() {
        let mut h = harness();
        assert!(matches!(
            h.host.start_round(params(), 0),
            Err(SessionError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn finalize_notifies_and_closes_everything() {
        let mut h = harness();
        let mut p1 = h.join("P1", 0);
        h.host.start_game(GameConfig::default()).unwrap();
        h.host.start_round(params(), 0).unwrap();
        h.host.submit_local(1, vec![], 1).unwrap();
        h.submit(&p1, "P1", 1, 2);
        p1.drain();

        h.host.finalize().unwrap();
        assert_eq!(p1.drain(), vec![Message::GameFinalize]);
        assert!(p1.is_closed());
        assert_eq!(h.host.phase(), Phase::Terminated);
        assert_eq!(h.store.finished_games().len(), 1);
        assert!(h.host.finalize().is_err());
    }

    #[test]
    fn view_tracks_state_before_events_are_published() {
        let mut h = harness();
        let view = h.host.shared_view();
        let _p1 = h.join("P1", 0);
        assert!(h.events.try_recv().is_some());
        assert_eq!(view.get().roster, ["H", "P1"]);
        assert_eq!(view.get().role, Role::Host);
    }
}
