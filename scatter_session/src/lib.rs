// scatter_session: Host/Peer session core for the multiplayer word game.
//
// One device hosts (the authoritative Host, owner of roster, round and
// scores) and up to five others join as Peers over plain TCP. The crate
// implements admission and reconnection queuing, the round lifecycle with
// clock-compensated countdowns, the score release barrier, heartbeat
// liveness, and the `Session` façade the UI drives.
//
// Module overview:
// - `session.rs`:    `Session` façade: role, commands, queries, teardown and
//                    snapshot-based resume.
// - `host.rs`:       Listener and host actor thread around `HostState`.
// - `host_state.rs`: Sans-IO Host logic: admission, routing, heartbeat
//                    expiry, barrier release. Unit-tested without sockets.
// - `peer.rs`:       Dial + JOIN handshake and the peer actor thread.
// - `peer_state.rs`: Sans-IO Peer logic: mirrors, compensated countdown,
//                    PONG replies.
// - `transport.rs`:  Per-connection reader/writer threads and `Outbox`.
// - `roster.rs`, `heartbeat.rs`, `round.rs`, `barrier.rs`, `timer.rs`:
//                    Pure state machines used by the Host.
// - `events.rs`:     Typed pub/sub with bounded per-subscriber channels.
// - `view.rs`:       Read-only state mirror behind façade queries.
// - `config.rs`, `error.rs`, `storage.rs`, `snapshot.rs`, `identifier.rs`:
//                    Tunables, errors, the storage boundary, the resume
//                    snapshot and short Host identifiers.
//
// Concurrency: every mutation of shared session state happens on one actor
// thread per role. Socket I/O happens only on reader and writer threads.
// The library never installs a tracing subscriber.

pub mod barrier;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod host;
pub mod host_state;
pub mod identifier;
pub mod peer;
pub mod peer_state;
pub mod roster;
pub mod round;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod timer;
pub mod transport;
pub mod view;

pub use config::{MidRoundPolicy, SessionConfig};
pub use error::{Result, SessionError, StoreError};
pub use events::{SessionEvent, Subscription, SubscriptionId};
pub use session::Session;
pub use snapshot::SessionSnapshot;
pub use storage::{GameStore, InProgressGame, MemoryStore, RoundResult};
pub use view::SessionView;
