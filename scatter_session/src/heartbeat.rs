// Heartbeat liveness tracking (Host side).
//
// The Host probes every `interval_ms` with PING and records, per player name,
// the local time of the last PONG. A name is seeded at admission so a fresh
// joiner is not flagged before its first answer. On each probe tick, names
// whose last PONG is older than `timeout_ms` are reported as expired and the
// caller removes them exactly as if their socket had closed.
//
// Expiry is only evaluated on probe ticks, so a silent Peer is removed
// within `timeout_ms + interval_ms` of its last PONG.
//
// PONG timestamps from the Peer are not trusted for age computation; the
// Host's own receive time is recorded so device clock skew cannot keep a
// dead Peer alive.

use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct HeartbeatMonitor {
    interval_ms: u64,
    timeout_ms: u64,
    last_probe_ms: Option<u64>,
    last_pong_ms: BTreeMap<String, u64>,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            last_probe_ms: None,
            last_pong_ms: BTreeMap::new(),
        }
    }

    pub fn seed(&mut self, name: &str, now_ms: u64) {
        self.last_pong_ms.insert(name.to_owned(), now_ms);
    }

    /// Record a PONG. Names that were never seeded (already removed) are
    /// ignored so a late PONG cannot resurrect a dropped player.
    pub fn record_pong(&mut self, name: &str, now_ms: u64) -> bool {
        match self.last_pong_ms.get_mut(name) {
            Some(last) => {
                *last = (*last).max(now_ms);
                true
            }
            None => false,
        }
    }

    pub fn forget(&mut self, name: &str) {
        self.last_pong_ms.remove(name);
    }

    /// Returns true (and marks the probe sent) if a PING is due at `now_ms`.
    pub fn probe_due(&mut self, now_ms: u64) -> bool {
        let due = match self.last_probe_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if due {
            self.last_probe_ms = Some(now_ms);
        }
        due
    }

    /// Names whose last PONG is older than the timeout, in name order.
    pub fn expired(&self, now_ms: u64) -> Vec<String> {
        self.last_pong_ms
            .iter()
            .filter(|(_, last)| now_ms.saturating_sub(**last) > self.timeout_ms)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn last_pong_ms(&self, name: &str) -> Option<u64> {
        self.last_pong_ms.get(name).copied()
    }

    pub fn clear(&mut self) {
        self.last_probe_ms = None;
        self.last_pong_ms.clear();
    }
}
