// Test-only player for multiplayer integration tests.
//
// Wraps a real `Session` (with its own `MemoryStore`) and a subscription to
// its event stream, and adds synchronous wait helpers so scenarios read
// top to bottom: host, join, start a round, wait for the countdown, submit,
// wait for the release. Everything underneath is the production code path
// over real loopback TCP; the only test-specific code is the polling.
//
// `RawPeer` is a bare socket speaking the wire protocol, for scenarios a
// well-behaved `Session` cannot produce (a peer that never answers PING).
//
// See also: `tests/full_round.rs` for the scenarios.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use scatter_protocol::{FramedReader, Message, RoundParams, write_frame};
use scatter_session::{MemoryStore, Session, SessionConfig, SessionEvent, Subscription};

/// Upper bound for every blocking wait.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Install a test-writer tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

/// Loopback, OS-assigned port, fast heartbeat and ticks.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        bind_addr: "127.0.0.1".into(),
        port: 0,
        heartbeat_interval_ms: 50,
        heartbeat_timeout_ms: 2_000,
        join_timeout_ms: 2_000,
        tick_ms: 10,
        event_buffer: 1_024,
        ..SessionConfig::default()
    }
}

pub fn round_params(timer_duration_ms: u64) -> RoundParams {
    RoundParams {
        letter: "L".into(),
        list_id: 7,
        version_id: "original_1988".into(),
        list_name: "Lista 7".into(),
        categories: vec!["Fruta".into(), "Ciudad".into(), "Color".into()],
        timer_duration_ms,
    }
}

pub struct TestPlayer {
    pub session: Session,
    pub store: Arc<MemoryStore>,
    events: Subscription,
    backlog: VecDeque<SessionEvent>,
}

impl TestPlayer {
    pub fn new(config: SessionConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let session = Session::new(config, store.clone()).unwrap();
        let events = session.subscribe();
        Self {
            session,
            store,
            events,
            backlog: VecDeque::new(),
        }
    }

    /// Host a session as `name`; returns the player and the listen address.
    pub fn host(name: &str, config: SessionConfig) -> (Self, SocketAddr) {
        let mut player = Self::new(config);
        let addr = player.session.host_session(name).unwrap();
        (player, addr)
    }

    pub fn join(addr: SocketAddr, name: &str, config: SessionConfig) -> Self {
        let mut player = Self::new(config);
        player.session.join_session(&addr.to_string(), name).unwrap();
        player
    }

    /// Block until an event matching `pred` arrives and return it. Events
    /// skipped on the way are discarded.
    pub fn wait_for(&mut self, what: &str, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        let start = Instant::now();
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if pred(&event) {
                    return event;
                }
                continue;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            if let Some(event) = self.events.recv_timeout(POLL_INTERVAL) {
                self.backlog.push_back(event);
            }
        }
    }

    pub fn wait_for_message(&mut self, what: &str, pred: impl Fn(&Message) -> bool) -> Message {
        match self.wait_for(what, |e| matches!(e, SessionEvent::Message(m) if pred(m))) {
            SessionEvent::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    /// Poll the session's state until `cond` holds.
    pub fn wait_until(&self, what: &str, cond: impl Fn(&Session) -> bool) {
        let start = Instant::now();
        while !cond(&self.session) {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Everything received so far that was not consumed by a wait.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events: Vec<SessionEvent> = self.backlog.drain(..).collect();
        events.extend(self.events.drain());
        events
    }
}

/// A bare protocol socket. Never answers PING.
pub struct RawPeer {
    reader: FramedReader<TcpStream>,
    writer: TcpStream,
    backlog: VecDeque<Message>,
}

impl RawPeer {
    pub fn join(addr: SocketAddr, name: &str) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(POLL_TIMEOUT)).unwrap();
        let writer = stream.try_clone().unwrap();
        let mut peer = Self {
            reader: FramedReader::new(stream),
            writer,
            backlog: VecDeque::new(),
        };
        peer.send(&Message::Join { name: name.into() });
        peer.recv_until(|m| {
            matches!(m, Message::RosterUpdate { names, pending }
                if names.iter().chain(pending).any(|n| n == name))
        });
        peer
    }

    pub fn send(&mut self, msg: &Message) {
        write_frame(&mut self.writer, msg).unwrap();
    }

    pub fn recv_until(&mut self, pred: impl Fn(&Message) -> bool) -> Message {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for message");
            if let Some(msg) = self.backlog.pop_front() {
                if pred(&msg) {
                    return msg;
                }
                continue;
            }
            let batch = self.reader.read_batch::<Message>().unwrap();
            self.backlog.extend(batch);
        }
    }
}
