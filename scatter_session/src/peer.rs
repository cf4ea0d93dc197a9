// Peer networking: dial, JOIN handshake and the peer actor loop.
//
// `connect` runs on the caller's thread and is bounded end to end by the
// join timeout: TCP connect, then JOIN, then reading until the Host either
// lists our name in a ROSTER_UPDATE (admitted or queued) or answers
// JOIN_REFUSED. On resume it also sends REQUEST_SYNC and waits for the
// SYNC_RESPONSE so the mirrors are populated before it returns. Everything
// read during the handshake is replayed into `PeerState` in arrival order,
// and the `FramedReader` (with any buffered partial frame) is handed to the
// reader thread, so no byte is lost between the two phases.
//
// After the handshake the Peer has the same shape as the Host: writer and
// reader threads around one socket and an actor that owns `PeerState`.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use scatter_protocol::{FramedReader, Message};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::EventBus;
use crate::peer_state::PeerState;
use crate::storage::GameStore;
use crate::timer::now_ms;
use crate::transport::{ReadEvent, spawn_reader, spawn_writer};
use crate::view::SharedView;

type Reply<T> = Sender<Result<T>>;

pub(crate) enum PeerCommand {
    Send { message: Message, reply: Reply<()> },
    SubmitScore { score: i32, answers: Vec<String>, reply: Reply<()> },
    RequestSync { reply: Reply<()> },
    Abandon { reply: Reply<()> },
    Stop,
}

enum PeerEvent {
    Inbound(Message),
    Closed,
    Command(PeerCommand),
}

pub struct PeerHandle {
    tx: Sender<PeerEvent>,
    actor: Option<JoinHandle<()>>,
    host_addr: SocketAddr,
    view: SharedView,
}

impl PeerHandle {
    pub fn host_addr(&self) -> SocketAddr {
        self.host_addr
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }

    pub fn is_running(&self) -> bool {
        self.actor.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn request<T>(&self, make: impl FnOnce(Reply<T>) -> PeerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(PeerEvent::Command(make(reply_tx)))
            .map_err(|_| SessionError::Closed)?;
        reply_rx.recv().map_err(|_| SessionError::Closed)?
    }

    pub fn stop(mut self) {
        let _ = self.tx.send(PeerEvent::Command(PeerCommand::Stop));
        if let Some(handle) = self.actor.take() {
            let _ = handle.join();
        }
    }
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    let connect_err = |source: io::Error| SessionError::Connect {
        addr: addr.to_owned(),
        source,
    };
    addr.to_socket_addrs()
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "address resolved to nothing",
            ))
        })
}

/// Dial the Host at `addr` and join as `self_name`.
pub fn connect(
    addr: &str,
    self_name: &str,
    resync: bool,
    config: &SessionConfig,
    bus: EventBus,
    store: Arc<dyn GameStore>,
) -> Result<PeerHandle> {
    let timeout = config.join_timeout();
    let timeout_err = SessionError::Timeout {
        timeout_ms: config.join_timeout_ms,
    };
    let deadline = Instant::now() + timeout;
    let host_addr = resolve(addr)?;

    let stream = TcpStream::connect_timeout(&host_addr, timeout).map_err(|source| {
        if matches!(source.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
            SessionError::Timeout {
                timeout_ms: config.join_timeout_ms,
            }
        } else {
            SessionError::Connect {
                addr: addr.to_owned(),
                source,
            }
        }
    })?;
    stream.set_nodelay(true)?;
    let read_half = stream.try_clone()?;
    let outbox = spawn_writer(stream, host_addr.to_string())?;

    outbox.send(&Message::Join {
        name: self_name.to_owned(),
    });
    if resync {
        outbox.send(&Message::RequestSync {
            name: self_name.to_owned(),
        });
    }

    let mut reader = FramedReader::new(read_half);
    let mut early = Vec::new();
    let mut accepted = false;
    let mut synced = !resync;
    while !(accepted && synced) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_err);
        }
        reader.get_ref().set_read_timeout(Some(remaining))?;
        let batch = match reader.read_batch::<Message>() {
            Ok(batch) => batch,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(source) => {
                return Err(SessionError::Connect {
                    addr: addr.to_owned(),
                    source,
                });
            }
        };
        for message in batch {
            match &message {
                Message::JoinRefused { reason } => {
                    return Err(SessionError::Refused {
                        reason: reason.clone(),
                    });
                }
                Message::RosterUpdate { names, pending }
                    if names.iter().chain(pending).any(|n| n == self_name) =>
                {
                    accepted = true;
                }
                Message::SyncResponse { .. } => synced = true,
                _ => {}
            }
            early.push(message);
        }
    }
    reader.get_ref().set_read_timeout(None)?;
    info!(host = %host_addr, name = self_name, resync, "joined session");

    let mut state = PeerState::new(self_name, outbox, bus, store);
    let view = state.shared_view();
    let now = now_ms();
    for message in early {
        state.handle_message(message, now);
    }

    let (tx, rx) = mpsc::channel();
    spawn_reader(reader, host_addr.to_string(), tx.clone(), |event| match event {
        ReadEvent::Message(message) => PeerEvent::Inbound(message),
        ReadEvent::Closed => PeerEvent::Closed,
    })?;
    let tick = config.tick();
    let actor = thread::Builder::new()
        .name("peer-actor".into())
        .spawn(move || run_actor(state, rx, tick))?;

    Ok(PeerHandle {
        tx,
        actor: Some(actor),
        host_addr,
        view,
    })
}

fn run_actor(mut state: PeerState, rx: Receiver<PeerEvent>, tick: Duration) {
    loop {
        match rx.recv_timeout(tick) {
            Ok(PeerEvent::Inbound(message)) => state.handle_message(message, now_ms()),
            Ok(PeerEvent::Closed) => {
                state.connection_lost();
                break;
            }
            Ok(PeerEvent::Command(PeerCommand::Stop)) => break,
            Ok(PeerEvent::Command(command)) => handle_command(&mut state, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        state.tick(now_ms());
    }
    debug!("peer actor stopped");
}

fn handle_command(state: &mut PeerState, command: PeerCommand) {
    match command {
        PeerCommand::Send { message, reply } => {
            let _ = reply.send(state.send_message(message));
        }
        PeerCommand::SubmitScore {
            score,
            answers,
            reply,
        } => {
            let _ = reply.send(state.submit_score(score, answers));
        }
        PeerCommand::RequestSync { reply } => {
            let _ = reply.send(state.request_sync());
        }
        PeerCommand::Abandon { reply } => {
            let _ = reply.send(state.abandon());
        }
        PeerCommand::Stop => {}
    }
}
