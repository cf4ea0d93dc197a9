// Host networking and the host actor loop.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread**: non-blocking `accept` poll so it can notice
//   `keep_running` going false. For each connection it spawns the writer,
//   hands the `Outbox` to the actor (`HostEvent::Accepted`), and only then
//   spawns the reader, so the actor always knows a connection before it sees
//   its first message.
// - **Reader threads** (one per connection): forward `Inbound` and a final
//   `Closed`.
// - **Actor thread**: owns `HostState`. It wakes on each event or every
//   `tick` (`recv_timeout`) and runs heartbeat and timer checks after each
//   wake-up. Façade commands arrive on the same channel with a reply sender,
//   so they are serialized with network events.
//
// The actor exits on `Stop`, when the event channel disconnects, or after a
// finalize moves the session to Terminated. Exiting drops `HostState`, which
// drops every outbox and so closes every socket.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scatter_protocol::{FramedReader, GameConfig, Message, Phase, RoundContext, RoundParams};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::host_state::{ConnectionId, HostState};
use crate::timer::now_ms;
use crate::transport::{Outbox, ReadEvent, spawn_reader, spawn_writer};
use crate::view::SharedView;

type Reply<T> = Sender<Result<T>>;

pub(crate) enum HostCommand {
    StartGame { config: GameConfig, reply: Reply<()> },
    UpdatePaperMode { paper_mode: bool, reply: Reply<()> },
    StartRound { params: RoundParams, reply: Reply<RoundContext> },
    EndRound { reply: Reply<()> },
    SubmitScore { score: i32, answers: Vec<String>, reply: Reply<()> },
    ForceRelease { reply: Reply<()> },
    ReturnToWaiting { reply: Reply<()> },
    Finalize { reply: Reply<()> },
    Send { message: Message, reply: Reply<()> },
    Stop,
}

enum HostEvent {
    Accepted { conn: ConnectionId, outbox: Outbox },
    Inbound { conn: ConnectionId, message: Message },
    Closed { conn: ConnectionId },
    Command(HostCommand),
}

/// Handle to a running host. Dropping it without `stop` leaves the threads
/// running until the process exits; `Session` always stops it.
pub struct HostHandle {
    tx: Sender<HostEvent>,
    keep_running: Arc<AtomicBool>,
    actor: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    view: SharedView,
}

impl HostHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }

    pub fn is_running(&self) -> bool {
        self.actor.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Send a command and block until the actor answers.
    pub(crate) fn request<T>(&self, make: impl FnOnce(Reply<T>) -> HostCommand) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(HostEvent::Command(make(reply_tx)))
            .map_err(|_| SessionError::Closed)?;
        reply_rx.recv().map_err(|_| SessionError::Closed)?
    }

    /// Stop the listener and the actor and wait for both.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        let _ = self.tx.send(HostEvent::Command(HostCommand::Stop));
        if let Some(handle) = self.actor.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
    }
}

/// Start the listener and actor threads for `state` on an already bound
/// listener.
pub fn start_host(listener: TcpListener, state: HostState, tick: Duration) -> io::Result<HostHandle> {
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();
    let view = state.shared_view();

    let listener_thread = {
        let keep_running = keep_running.clone();
        let tx = tx.clone();
        thread::Builder::new()
            .name("host-listener".into())
            .spawn(move || run_listener(listener, tx, keep_running))?
    };

    let actor = {
        let keep_running = keep_running.clone();
        thread::Builder::new()
            .name("host-actor".into())
            .spawn(move || run_actor(state, rx, tick, keep_running))?
    };

    info!(addr = %local_addr, "hosting session");
    Ok(HostHandle {
        tx,
        keep_running,
        actor: Some(actor),
        listener: Some(listener_thread),
        local_addr,
        view,
    })
}

fn run_listener(listener: TcpListener, tx: Sender<HostEvent>, keep_running: Arc<AtomicBool>) {
    let mut next_id = 0u64;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                next_id += 1;
                let conn = ConnectionId(next_id);
                if let Err(e) = attach(stream, addr, conn, &tx) {
                    warn!(%addr, error = %e, "failed to set up connection");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!(error = %e, "accept failed, listener stopping");
                break;
            }
        }
    }
    debug!("listener stopped");
}

fn attach(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnectionId,
    tx: &Sender<HostEvent>,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let read_half = stream.try_clone()?;
    let label = addr.to_string();
    let outbox = spawn_writer(stream, label.clone())?;
    if tx.send(HostEvent::Accepted { conn, outbox }).is_err() {
        return Ok(());
    }
    spawn_reader(
        FramedReader::new(read_half),
        label,
        tx.clone(),
        move |event| match event {
            ReadEvent::Message(message) => HostEvent::Inbound { conn, message },
            ReadEvent::Closed => HostEvent::Closed { conn },
        },
    )?;
    Ok(())
}

fn run_actor(
    mut state: HostState,
    rx: Receiver<HostEvent>,
    tick: Duration,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(tick) {
            Ok(HostEvent::Command(HostCommand::Stop)) => break,
            Ok(event) => {
                handle_event(&mut state, event);
                while let Ok(event) = rx.try_recv() {
                    if matches!(event, HostEvent::Command(HostCommand::Stop)) {
                        keep_running.store(false, Ordering::SeqCst);
                        break;
                    }
                    handle_event(&mut state, event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        state.tick(now_ms());
        if state.phase() == Phase::Terminated {
            break;
        }
    }
    keep_running.store(false, Ordering::SeqCst);
    state.close_all();
    info!("host stopped");
}

fn handle_event(state: &mut HostState, event: HostEvent) {
    match event {
        HostEvent::Accepted { conn, outbox } => state.accept(conn, outbox),
        HostEvent::Inbound { conn, message } => state.handle_message(conn, message, now_ms()),
        HostEvent::Closed { conn } => state.handle_closed(conn, now_ms()),
        HostEvent::Command(command) => handle_command(state, command),
    }
}

fn handle_command(state: &mut HostState, command: HostCommand) {
    match command {
        HostCommand::StartGame { config, reply } => {
            let _ = reply.send(state.start_game(config));
        }
        HostCommand::UpdatePaperMode { paper_mode, reply } => {
            let _ = reply.send(state.update_paper_mode(paper_mode));
        }
        HostCommand::StartRound { params, reply } => {
            let _ = reply.send(state.start_round(params, now_ms()));
        }
        HostCommand::EndRound { reply } => {
            let _ = reply.send(state.end_round());
        }
        HostCommand::SubmitScore {
            score,
            answers,
            reply,
        } => {
            let _ = reply.send(state.submit_local(score, answers, now_ms()));
        }
        HostCommand::ForceRelease { reply } => {
            let _ = reply.send(state.force_release(now_ms()));
        }
        HostCommand::ReturnToWaiting { reply } => {
            let _ = reply.send(state.return_to_waiting());
        }
        HostCommand::Finalize { reply } => {
            let _ = reply.send(state.finalize());
        }
        HostCommand::Send { message, reply } => {
            state.send(message);
            let _ = reply.send(Ok(()));
        }
        HostCommand::Stop => {}
    }
}
