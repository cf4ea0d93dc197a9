// Roster and admission control.
//
// `Roster` holds the admitted player names in join order (Host first) and the
// reconnection queue: names that joined while a game was configured or a
// round was running. A name is in at most one of the two lists.
//
// Admission depends only on the round phase and on whether GAME_START has
// gone out:
// - Lobby, game not configured: admitted straight into the roster.
// - Anything else: queued. If the phase is Lobby the caller should deliver
//   GAME_START right away and promote (`Queued { deliver_now: true }`);
//   otherwise the name waits for the next `promote_pending` batch.
// - A member joining again outside Lobby is a reconnection too: it leaves
//   the roster and waits in the queue like any other late joiner. In a
//   configured Lobby it keeps its slot.
//
// This type does no I/O. `HostState` turns its results into broadcasts.
// Duplicate and capacity checks happen in `HostState` before `admit`.

use scatter_protocol::Phase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Queued { deliver_now: bool },
}

#[derive(Clone, Debug, Default)]
pub struct Roster {
    members: Vec<String>,
    pending: Vec<String>,
}

impl Roster {
    pub fn new(host_name: &str) -> Self {
        Self {
            members: vec![host_name.to_owned()],
            pending: Vec::new(),
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Roster members plus queued names.
    pub fn occupancy(&self) -> usize {
        self.members.len() + self.pending.len()
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.members.iter().any(|n| n == name)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.iter().any(|n| n == name)
    }

    pub fn knows(&self, name: &str) -> bool {
        self.is_member(name) || self.is_pending(name)
    }

    pub fn admit(&mut self, name: &str, phase: Phase, config_sent: bool) -> Admission {
        if phase == Phase::Lobby && !config_sent {
            if !self.knows(name) {
                self.members.push(name.to_owned());
            }
            return Admission::Admitted;
        }
        if phase != Phase::Lobby {
            self.members.retain(|n| n != name);
        }
        if !self.knows(name) {
            self.pending.push(name.to_owned());
        }
        Admission::Queued {
            deliver_now: phase == Phase::Lobby,
        }
    }

    /// Drop `name` from whichever list holds it. Returns true if it was known.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.occupancy();
        self.members.retain(|n| n != name);
        self.pending.retain(|n| n != name);
        self.occupancy() != before
    }

    /// Move every queued name into the roster, in queue order, and return
    /// the promoted names.
    pub fn promote_pending(&mut self) -> Vec<String> {
        let promoted = std::mem::take(&mut self.pending);
        self.members.extend(promoted.iter().cloned());
        promoted
    }

    /// Promote a single queued name. Returns false if it was not queued.
    pub fn promote(&mut self, name: &str) -> bool {
        let Some(idx) = self.pending.iter().position(|n| n == name) else {
            return false;
        };
        let name = self.pending.remove(idx);
        self.members.push(name);
        true
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.pending.clear();
    }
}
