// Storage boundary.
//
// Game history lives outside the session core. `GameStore` is the whole
// contract: append one released round to the game in progress, read the game
// in progress back (for a "continue game" prompt after a restart), and close
// it when the Host finalizes. The session calls the store from its actor
// thread, so implementations should be quick; `MemoryStore` is the in-process
// implementation used by tests and as the default.

use std::sync::{Mutex, PoisonError};

use scatter_protocol::PlayerResult;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One released round, as every device saw it in ALL_SCORES.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub letter: String,
    pub list_id: u32,
    pub version_id: String,
    pub list_name: String,
    pub results: Vec<PlayerResult>,
    pub finished_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InProgressGame {
    pub rounds: Vec<RoundResult>,
}

impl InProgressGame {
    /// Cumulative score per player name, in first-seen order.
    pub fn totals(&self) -> Vec<(String, i64)> {
        let mut totals: Vec<(String, i64)> = Vec::new();
        for result in self.rounds.iter().flat_map(|r| &r.results) {
            match totals.iter_mut().find(|(name, _)| *name == result.name) {
                Some((_, total)) => *total += i64::from(result.score),
                None => totals.push((result.name.clone(), i64::from(result.score))),
            }
        }
        totals
    }
}

pub trait GameStore: Send + Sync {
    fn persist_round_result(&self, result: &RoundResult) -> Result<(), StoreError>;

    fn load_in_progress_game(&self) -> Option<InProgressGame>;

    fn finalize_game(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    current: Option<InProgressGame>,
    finished: Vec<InProgressGame>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Games closed by `finalize_game`, oldest first.
    pub fn finished_games(&self) -> Vec<InProgressGame> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished
            .clone()
    }
}

impl GameStore for MemoryStore {
    fn persist_round_result(&self, result: &RoundResult) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .current
            .get_or_insert_with(InProgressGame::default)
            .rounds
            .push(result.clone());
        Ok(())
    }

    fn load_in_progress_game(&self) -> Option<InProgressGame> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    fn finalize_game(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.current.take() {
            Some(game) => {
                inner.finished.push(game);
                Ok(())
            }
            None => Err(StoreError("no game in progress".into())),
        }
    }
}
