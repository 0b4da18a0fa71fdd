//! Round state machine
//!
//! ```text
//! WAITING -> COUNTDOWN -> PLAYING -> GAME_OVER -> WAITING
//!               |                       ^
//!               +-----------------------+   (readiness lost mid-countdown)
//! ```
//!
//! [`Round`] only tracks counters and the roster. Deciding *when* to move is
//! the orchestrator's job.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::types::{PlayerId, RoundState, SeatNumber, TeamNumber};

/// A participant of the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player: PlayerId,
    pub seat: SeatNumber,
    pub team: TeamNumber,
}

/// One player's line in the final results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub player: PlayerId,
    pub team: TeamNumber,
    pub won: bool,
    pub rating_before: Option<i32>,
    pub rating_after: Option<i32>,
}

/// Broadcast when a round ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub winners: Vec<TeamNumber>,
    pub elapsed_secs: u32,
    pub rated: bool,
    pub players: Vec<PlayerResult>,
}

#[derive(Debug, Clone, Default)]
pub struct Round {
    state: RoundState,
    /// Seconds left in the countdown or cooldown
    remaining: u32,
    elapsed: u32,
    roster: Vec<RosterEntry>,
    roster_fixed: bool,
    winners: Vec<TeamNumber>,
    /// Rounds played at this table, for logging
    number: u64,
}

impl Round {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn transition(&mut self, next: RoundState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next == RoundState::Countdown {
            self.number += 1;
        }
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn set_remaining(&mut self, secs: u32) {
        self.remaining = secs;
    }

    /// Decrement the countdown/cooldown, returning the new value
    pub fn count_down(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    pub fn tick_elapsed(&mut self) -> u32 {
        self.elapsed += 1;
        self.elapsed
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn set_roster(&mut self, roster: Vec<RosterEntry>) {
        if !self.roster_fixed {
            self.roster = roster;
        }
    }

    /// Drop a player from the roster unless it has been fixed
    pub fn remove_from_roster(&mut self, player: PlayerId) -> bool {
        if self.roster_fixed {
            return false;
        }
        let before = self.roster.len();
        self.roster.retain(|e| e.player != player);
        self.roster.len() != before
    }

    pub fn clear_roster(&mut self) {
        if !self.roster_fixed {
            self.roster.clear();
        }
    }

    pub fn fix_roster(&mut self) {
        self.roster_fixed = true;
    }

    pub fn roster_fixed(&self) -> bool {
        self.roster_fixed
    }

    /// Distinct teams present in the roster
    pub fn roster_teams(&self) -> BTreeSet<TeamNumber> {
        self.roster.iter().map(|e| e.team).collect()
    }

    pub fn winners(&self) -> &[TeamNumber] {
        &self.winners
    }

    pub fn set_winners(&mut self, winners: Vec<TeamNumber>) {
        self.winners = winners;
    }

    /// Back to a fresh WAITING round, keeping the round counter
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        self.transition(RoundState::Waiting)?;
        self.remaining = 0;
        self.elapsed = 0;
        self.roster.clear();
        self.roster_fixed = false;
        self.winners.clear();
        Ok(())
    }
}
