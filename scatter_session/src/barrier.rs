// Score aggregation barrier.
//
// Holds at most one submission per roster member and releases only when
// every current member has one. Two rules keep "submission count == roster
// size" deterministic on the single-writer actor:
// - submissions from names outside the roster are refused, and
// - removing a member discards its submission.
// So the barrier can never count a departed player, and a departure shrinks
// the target immediately. The caller re-checks completion after each
// submission and each removal.
//
// `release` returns results in roster order and clears the map.

use std::collections::BTreeMap;

use scatter_protocol::PlayerResult;

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreSubmission {
    pub score: i32,
    pub answers: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Same player submitted again; the newer submission replaced the old.
    Replaced,
    NotInRoster,
}

#[derive(Clone, Debug, Default)]
pub struct ScoreBarrier {
    pending: BTreeMap<String, ScoreSubmission>,
}

impl ScoreBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(
        &mut self,
        roster: &[String],
        name: &str,
        submission: ScoreSubmission,
    ) -> SubmitOutcome {
        if !roster.iter().any(|n| n == name) {
            return SubmitOutcome::NotInRoster;
        }
        match self.pending.insert(name.to_owned(), submission) {
            Some(_) => SubmitOutcome::Replaced,
            None => SubmitOutcome::Accepted,
        }
    }

    pub fn discard(&mut self, name: &str) -> bool {
        self.pending.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn has_submitted(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub fn is_complete(&self, roster: &[String]) -> bool {
        !roster.is_empty() && self.pending.len() == roster.len()
    }

    /// Drain every held submission in roster order. Used both for the
    /// natural release and for a forced one (which may be partial).
    pub fn release(&mut self, roster: &[String]) -> Vec<PlayerResult> {
        let mut pending = std::mem::take(&mut self.pending);
        roster
            .iter()
            .filter_map(|name| {
                pending.remove(name).map(|s| PlayerResult {
                    name: name.clone(),
                    score: s.score,
                    answers: s.answers,
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
