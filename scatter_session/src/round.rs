// Round lifecycle state machine (Host side).
//
//   Lobby ──start_round──▶ RoundActive ──end_round──▶ Scoring
//     ▲                         │                        │
//     └──────finish_round───────┴────────────────────────┘
//   any ──terminate──▶ Terminated
//
// `start_game` configures the game once (GAME_START) without leaving Lobby.
// Rounds can only start from a configured Lobby. `finish_round` is driven by
// the score barrier's release and accepts RoundActive too, because a forced
// release may happen before the Host's own timer ran out.
//
// The lifecycle does not broadcast; `HostState` sends the matching messages
// after each successful transition so every transition has exactly one
// broadcast path.

use scatter_protocol::{GameConfig, Phase, RoundContext, RoundParams};

use crate::error::{Result, SessionError};

#[derive(Clone, Debug, Default)]
pub struct RoundLifecycle {
    phase: Phase,
    game_config: Option<GameConfig>,
    round: Option<RoundContext>,
    rounds_played: u32,
}

impl RoundLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn game_config(&self) -> Option<&GameConfig> {
        self.game_config.as_ref()
    }

    /// True once GAME_START has been sent for this game.
    pub fn config_sent(&self) -> bool {
        self.game_config.is_some()
    }

    pub fn round(&self) -> Option<&RoundContext> {
        self.round.as_ref()
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    fn require(&self, allowed: &[Phase], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidPhase {
                phase: self.phase,
                operation,
            })
        }
    }

    pub fn start_game(&mut self, config: GameConfig) -> Result<()> {
        self.require(&[Phase::Lobby], "start_game")?;
        if self.config_sent() {
            return Err(SessionError::InvalidPhase {
                phase: self.phase,
                operation: "start_game (already started)",
            });
        }
        self.game_config = Some(config);
        Ok(())
    }

    pub fn set_paper_mode(&mut self, paper_mode: bool) -> Result<()> {
        self.require(&[Phase::Lobby], "update_paper_mode")?;
        if let Some(config) = self.game_config.as_mut() {
            config.paper_mode = paper_mode;
        }
        Ok(())
    }

    pub fn start_round(&mut self, params: RoundParams, now_ms: u64) -> Result<RoundContext> {
        self.require(&[Phase::Lobby], "start_round")?;
        if !self.config_sent() {
            return Err(SessionError::InvalidPhase {
                phase: self.phase,
                operation: "start_round (game not started)",
            });
        }
        let ctx = RoundContext::from_params(params, now_ms);
        self.round = Some(ctx.clone());
        self.phase = Phase::RoundActive;
        Ok(ctx)
    }

    pub fn end_round(&mut self) -> Result<()> {
        self.require(&[Phase::RoundActive], "end_round")?;
        self.phase = Phase::Scoring;
        Ok(())
    }

    pub fn finish_round(&mut self) -> Result<()> {
        self.require(&[Phase::RoundActive, Phase::Scoring], "finish_round")?;
        self.phase = Phase::Lobby;
        self.rounds_played += 1;
        Ok(())
    }

    pub fn terminate(&mut self) {
        self.phase = Phase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RoundParams {
        RoundParams {
            letter: "C".into(),
            list_id: 2,
            version_id: "original_1988".into(),
            list_name: "Lista 2".into(),
            categories: vec!["Color".into()],
            timer_duration_ms: 90_000,
        }
    }

    #[test]
    fn normal_loop() {
        let mut rl = RoundLifecycle::new();
        rl.start_game(GameConfig::default()).unwrap();
        assert_eq!(rl.phase(), Phase::Lobby);

        let ctx = rl.start_round(params(), 1_000).unwrap();
        assert_eq!(ctx.origin_timestamp, 1_000);
        assert_eq!(rl.phase(), Phase::RoundActive);

        rl.end_round().unwrap();
        assert_eq!(rl.phase(), Phase::Scoring);

        rl.finish_round().unwrap();
        assert_eq!(rl.phase(), Phase::Lobby);
        assert_eq!(rl.rounds_played(), 1);
        assert_eq!(rl.round().map(|r| r.letter.as_str()), Some("C"));
    }

    #[test]
    fn round_requires_game_start() {
        let mut rl = RoundLifecycle::new();
        let err = rl.start_round(params(), 0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidPhase { .. }));
        assert_eq!(rl.phase(), Phase::Lobby);
    }

    #[test]
    fn game_start_is_one_time() {
        let mut rl = RoundLifecycle::new();
        rl.start_game(GameConfig::default()).unwrap();
        assert!(rl.start_game(GameConfig::default()).is_err());
    }

    #[test]
    fn cannot_start_round_while_one_is_running() {
        let mut rl = RoundLifecycle::new();
        rl.start_game(GameConfig::default()).unwrap();
        rl.start_round(params(), 0).unwrap();
        assert!(rl.start_round(params(), 5).is_err());
        rl.end_round().unwrap();
        assert!(rl.end_round().is_err());
    }

    #[test]
    fn forced_release_finishes_from_round_active() {
        let mut rl = RoundLifecycle::new();
        rl.start_game(GameConfig::default()).unwrap();
        rl.start_round(params(), 0).unwrap();
        rl.finish_round().unwrap();
        assert_eq!(rl.phase(), Phase::Lobby);
        assert!(rl.finish_round().is_err());
    }

    #[test]
    fn paper_mode_update_only_in_lobby() {
        let mut rl = RoundLifecycle::new();
        rl.start_game(GameConfig::default()).unwrap();
        rl.set_paper_mode(true).unwrap();
        assert!(rl.game_config().unwrap().paper_mode);
        rl.start_round(params(), 0).unwrap();
        assert!(rl.set_paper_mode(false).is_err());
    }

    #[test]
    fn terminate_from_any_phase() {
        let mut rl = RoundLifecycle::new();
        rl.start_game(GameConfig::default()).unwrap();
        rl.start_round(params(), 0).unwrap();
        rl.terminate();
        assert_eq!(rl.phase(), Phase::Terminated);
        assert!(rl.start_round(params(), 0).is_err());
    }
}
