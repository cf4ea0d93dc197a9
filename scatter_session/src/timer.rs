// Wall-clock helper and the local round countdown.
//
// Every device runs its own `RoundTimer`; expiry is never signaled over the
// network. Peers start theirs from `RoundContext::compensated_countdown_ms`,
// so all devices expire within one message latency of each other. The timer
// is polled by the owning actor on each tick and reports at most one
// transition per poll.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. A clock set before 1970 reads as 0.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerTick {
    /// Remaining time crossed the warning threshold. Fires once.
    Warning { remaining_ms: u64 },
    Expired,
}

#[derive(Clone, Debug)]
pub struct RoundTimer {
    deadline_ms: u64,
    warning_threshold_ms: Option<u64>,
    warned: bool,
    expired: bool,
}

impl RoundTimer {
    pub fn start(now_ms: u64, countdown_ms: u64, warning_threshold_ms: Option<u64>) -> Self {
        Self {
            deadline_ms: now_ms.saturating_add(countdown_ms),
            warning_threshold_ms,
            warned: false,
            expired: false,
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn poll(&mut self, now_ms: u64) -> Option<TimerTick> {
        if self.expired {
            return None;
        }
        let remaining_ms = self.remaining_ms(now_ms);
        if remaining_ms == 0 {
            self.expired = true;
            self.warned = true;
            return Some(TimerTick::Expired);
        }
        match self.warning_threshold_ms {
            Some(threshold) if !self.warned && remaining_ms <= threshold => {
                self.warned = true;
                Some(TimerTick::Warning { remaining_ms })
            }
            _ => None,
        }
    }
}
