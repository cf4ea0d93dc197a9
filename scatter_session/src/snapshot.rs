// Reconnection snapshot.
//
// `teardown` keeps exactly what is needed to try to recreate the same role:
// who we were, where we were connected (Host: the listen address; Peer: the
// Host's address), our player name, and the phase we left in. Nothing else
// about the protocol state survives; a resumed Peer repopulates its mirrors
// through REQUEST_SYNC.

use scatter_protocol::{Phase, Role};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub role: Role,
    pub address: String,
    pub self_name: String,
    pub phase: Phase,
}

impl SessionSnapshot {
    /// Check the preconditions for `attempt_resume`.
    pub fn validate(&self) -> Result<()> {
        if self.role == Role::None {
            return Err(SessionError::NotResumable {
                reason: "no role recorded",
            });
        }
        if self.self_name.trim().is_empty() {
            return Err(SessionError::NotResumable {
                reason: "no player name recorded",
            });
        }
        if self.address.is_empty() {
            return Err(SessionError::NotResumable {
                reason: "no address recorded",
            });
        }
        if self.phase == Phase::Terminated {
            return Err(SessionError::NotResumable {
                reason: "game was finalized",
            });
        }
        Ok(())
    }

    pub fn is_resumable(&self) -> bool {
        self.validate().is_ok()
    }
}
