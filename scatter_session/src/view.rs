// Read-only mirror of the actor's state for façade queries.
//
// Only the owning actor writes it. It is refreshed before every event is
// published, so a subscriber that reacts to an event and then queries the
// façade sees state at least as new as that event.

use std::sync::{Arc, Mutex, PoisonError};

use scatter_protocol::{GameConfig, Phase, Role, RoundContext};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionView {
    pub role: Role,
    pub self_name: String,
    pub phase: Phase,
    pub roster: Vec<String>,
    pub pending: Vec<String>,
    pub game_config: Option<GameConfig>,
    pub round: Option<RoundContext>,
}

#[derive(Clone, Debug, Default)]
pub struct SharedView(Arc<Mutex<SessionView>>);

impl SharedView {
    pub fn new(view: SessionView) -> Self {
        Self(Arc::new(Mutex::new(view)))
    }

    pub fn get(&self) -> SessionView {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, view: SessionView) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = view;
    }
}
