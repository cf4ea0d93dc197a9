// Session façade.
//
// `Session` is the one object the application composes and hands to its UI
// and storage collaborators. It owns the role (idle, Host or Peer), the event
// bus that outlives individual connections, and the reconnection snapshot.
// Commands are forwarded to the running actor and block only until the actor
// answers; queries read the actor's `SharedView` mirror and never block the
// actor.
//
// Lifecycle:
//
//   idle ──host_session──▶ Host ──teardown──▶ idle (snapshot kept)
//   idle ──join_session──▶ Peer ──teardown──▶ idle (snapshot kept)
//   idle ──attempt_resume(snapshot)──▶ Host | Peer
//
// Subscriptions survive teardown and resume, so a UI subscribes once.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;

use scatter_protocol::{GameConfig, Message, Phase, Role, RoundContext, RoundParams};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{EventBus, SessionEvent, Subscription, SubscriptionId};
use crate::host::{HostCommand, HostHandle, start_host};
use crate::host_state::HostState;
use crate::identifier::{address_from_identifier, lan_ipv4, server_identifier};
use crate::peer::{self, PeerCommand, PeerHandle};
use crate::snapshot::SessionSnapshot;
use crate::storage::{GameStore, InProgressGame};
use crate::view::SessionView;

enum Active {
    Host(HostHandle),
    Peer { handle: PeerHandle, address: String },
}

impl Active {
    fn view(&self) -> SessionView {
        match self {
            Active::Host(handle) => handle.view().get(),
            Active::Peer { handle, .. } => handle.view().get(),
        }
    }

    fn address(&self) -> String {
        match self {
            Active::Host(handle) => handle.local_addr().to_string(),
            Active::Peer { address, .. } => address.clone(),
        }
    }
}

pub struct Session {
    config: SessionConfig,
    store: Arc<dyn GameStore>,
    bus: EventBus,
    active: Option<Active>,
    last_snapshot: Option<SessionSnapshot>,
}

impl Session {
    pub fn new(config: SessionConfig, store: Arc<dyn GameStore>) -> Result<Self> {
        config.validate()?;
        let bus = EventBus::new(config.event_buffer);
        Ok(Self {
            config,
            store,
            bus,
            active: None,
            last_snapshot: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    /// Listen on the configured address as Host. Returns the bound address.
    pub fn host_session(&mut self, self_name: &str) -> Result<SocketAddr> {
        let addr = self.config.listen_addr();
        self.host_at(&addr, self_name)
    }

    fn host_at(&mut self, addr: &str, self_name: &str) -> Result<SocketAddr> {
        self.ensure_idle()?;
        validate_name(self_name)?;
        let listener = TcpListener::bind(addr)?;
        let state = HostState::new(self_name, &self.config, self.bus.clone(), self.store.clone());
        let handle = start_host(listener, state, self.config.tick())?;
        let local = handle.local_addr();
        info!(addr = %local, name = self_name, "session hosted");
        self.active = Some(Active::Host(handle));
        Ok(local)
    }

    /// Dial a Host and join as `self_name`. Fails with `Refused`, `Timeout`
    /// or `Connect` instead of hanging.
    pub fn join_session(&mut self, address: &str, self_name: &str) -> Result<()> {
        self.join_with(address, self_name, false)
    }

    /// Join the Host whose numeric identifier is shown on its screen, on this
    /// device's /24 and the configured port.
    pub fn join_by_identifier(&mut self, identifier: &str, self_name: &str) -> Result<()> {
        let local = lan_ipv4().ok_or_else(|| SessionError::Config {
            message: "no IPv4 LAN address available".into(),
        })?;
        let addr = address_from_identifier(local, identifier, self.config.port)?;
        self.join_session(&addr.to_string(), self_name)
    }

    fn join_with(&mut self, address: &str, self_name: &str, resync: bool) -> Result<()> {
        self.ensure_idle()?;
        validate_name(self_name)?;
        let handle = peer::connect(
            address,
            self_name,
            resync,
            &self.config,
            self.bus.clone(),
            self.store.clone(),
        )?;
        self.active = Some(Active::Peer {
            handle,
            address: address.to_owned(),
        });
        Ok(())
    }

    /// Stop all threads and close every transport. Role, roster and round
    /// state reset; a snapshot is kept for `attempt_resume`.
    pub fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let view = active.view();
        let snapshot = SessionSnapshot {
            role: view.role,
            address: active.address(),
            self_name: view.self_name,
            phase: view.phase,
        };
        match active {
            Active::Host(handle) => handle.stop(),
            Active::Peer { handle, .. } => handle.stop(),
        }
        info!(role = ?snapshot.role, phase = ?snapshot.phase, "session torn down");
        self.last_snapshot = Some(snapshot);
        self.bus.publish(SessionEvent::Closed);
    }

    /// The live snapshot while connected, else the one kept by the last
    /// teardown.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        match &self.active {
            Some(active) => {
                let view = active.view();
                Some(SessionSnapshot {
                    role: view.role,
                    address: active.address(),
                    self_name: view.self_name,
                    phase: view.phase,
                })
            }
            None => self.last_snapshot.clone(),
        }
    }

    /// Recreate the role recorded in `snapshot`: re-listen on the same
    /// address as Host, or re-dial and resync as Peer.
    pub fn attempt_resume(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        snapshot.validate()?;
        self.ensure_idle()?;
        info!(role = ?snapshot.role, address = %snapshot.address, "attempting resume");
        match snapshot.role {
            Role::Host => self
                .host_at(&snapshot.address, &snapshot.self_name)
                .map(|_| ()),
            Role::Peer => self.join_with(&snapshot.address, &snapshot.self_name, true),
            Role::None => Err(SessionError::NotResumable {
                reason: "no role recorded",
            }),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.active {
            Some(_) => Err(SessionError::AlreadyActive),
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Host: route `message` by the normal routing rules. Peer: send it to
    /// the Host.
    pub fn send(&self, message: Message) -> Result<()> {
        match &self.active {
            Some(Active::Host(handle)) => {
                handle.request(|reply| HostCommand::Send { message, reply })
            }
            Some(Active::Peer { handle, .. }) => {
                handle.request(|reply| PeerCommand::Send { message, reply })
            }
            None => Err(SessionError::Closed),
        }
    }

    // ---------------------------------------------------------------------
    // Game commands
    // ---------------------------------------------------------------------

    fn host(&self) -> Result<&HostHandle> {
        match &self.active {
            Some(Active::Host(handle)) => Ok(handle),
            _ => Err(SessionError::WrongRole {
                required: Role::Host,
                actual: self.role(),
            }),
        }
    }

    fn peer(&self) -> Result<&PeerHandle> {
        match &self.active {
            Some(Active::Peer { handle, .. }) => Ok(handle),
            _ => Err(SessionError::WrongRole {
                required: Role::Peer,
                actual: self.role(),
            }),
        }
    }

    pub fn start_game(&self, config: GameConfig) -> Result<()> {
        self.host()?
            .request(|reply| HostCommand::StartGame { config, reply })
    }

    pub fn update_paper_mode(&self, paper_mode: bool) -> Result<()> {
        self.host()?
            .request(|reply| HostCommand::UpdatePaperMode { paper_mode, reply })
    }

    pub fn start_round(&self, params: RoundParams) -> Result<RoundContext> {
        self.host()?
            .request(|reply| HostCommand::StartRound { params, reply })
    }

    /// End the running round early. Peers see the same TIMER_END as on
    /// natural expiry.
    pub fn end_round(&self) -> Result<()> {
        self.host()?.request(|reply| HostCommand::EndRound { reply })
    }

    pub fn submit_score(&self, score: i32, answers: Vec<String>) -> Result<()> {
        match &self.active {
            Some(Active::Host(handle)) => handle.request(|reply| HostCommand::SubmitScore {
                score,
                answers,
                reply,
            }),
            Some(Active::Peer { handle, .. }) => handle.request(|reply| PeerCommand::SubmitScore {
                score,
                answers,
                reply,
            }),
            None => Err(SessionError::Closed),
        }
    }

    pub fn force_release(&self) -> Result<()> {
        self.host()?
            .request(|reply| HostCommand::ForceRelease { reply })
    }

    pub fn return_to_waiting(&self) -> Result<()> {
        self.host()?
            .request(|reply| HostCommand::ReturnToWaiting { reply })
    }

    /// End the game for everyone. The Host stops serving; call `teardown`
    /// afterwards to release the role.
    pub fn finalize(&self) -> Result<()> {
        self.host()?.request(|reply| HostCommand::Finalize { reply })
    }

    /// Leave the game without ending it for the others, then tear down.
    pub fn abandon(&mut self) -> Result<()> {
        self.peer()?.request(|reply| PeerCommand::Abandon { reply })?;
        self.teardown();
        Ok(())
    }

    pub fn request_sync(&self) -> Result<()> {
        self.peer()?
            .request(|reply| PeerCommand::RequestSync { reply })
    }

    pub fn in_progress_game(&self) -> Option<InProgressGame> {
        self.store.load_in_progress_game()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn view(&self) -> SessionView {
        self.active.as_ref().map(Active::view).unwrap_or_default()
    }

    /// True while the role's actor is still running.
    pub fn is_connected(&self) -> bool {
        match &self.active {
            Some(Active::Host(handle)) => handle.is_running(),
            Some(Active::Peer { handle, .. }) => handle.is_running(),
            None => false,
        }
    }

    pub fn role(&self) -> Role {
        self.view().role
    }

    pub fn phase(&self) -> Phase {
        self.view().phase
    }

    pub fn self_name(&self) -> String {
        self.view().self_name
    }

    pub fn roster(&self) -> Vec<String> {
        self.view().roster
    }

    pub fn pending(&self) -> Vec<String> {
        self.view().pending
    }

    pub fn game_config(&self) -> Option<GameConfig> {
        self.view().game_config
    }

    pub fn round(&self) -> Option<RoundContext> {
        self.view().round
    }

    /// Host: the listening address. Peer: `None`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.active {
            Some(Active::Host(handle)) => Some(handle.local_addr()),
            _ => None,
        }
    }

    /// Peer: the Host's address.
    pub fn host_addr(&self) -> Option<SocketAddr> {
        match &self.active {
            Some(Active::Peer { handle, .. }) => Some(handle.host_addr()),
            _ => None,
        }
    }

    /// Host: the short number Peers type to find this device.
    pub fn server_identifier(&self) -> Option<u8> {
        let ip = match self.local_addr()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            IpAddr::V4(_) => lan_ipv4()?,
            IpAddr::V6(_) => return None,
        };
        Some(server_identifier(ip))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SessionError::Config {
            message: "player name must not be empty".into(),
        });
    }
    Ok(())
}
