//! Team rating engine
//!
//! Each team is a single rating pool (the mean of its members). Every pair of
//! teams where exactly one side won is a decisive game scored with the usual
//! expected-score formula:
//!
//! ```text
//! E(a, b) = 1 / (1 + 10^((Rb - Ra) / 400))
//! delta(a) = K * sum over decisive opponents (S - E) / decisive opponents
//! ```
//!
//! The team delta is applied to every member. Pairs of two winners or two
//! non-winners are draws that do not move ratings.

use serde::Serialize;

use crate::types::{PlayerId, TeamNumber, DEFAULT_K_FACTOR};

/// One team's participants with their pre-round ratings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRoster {
    pub team: TeamNumber,
    pub players: Vec<(PlayerId, i32)>,
}

impl TeamRoster {
    fn average(&self) -> f64 {
        if self.players.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.players.iter().map(|(_, r)| *r as i64).sum();
        sum as f64 / self.players.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingChange {
    pub player: PlayerId,
    pub old: i32,
    pub new: i32,
}

impl RatingChange {
    pub fn delta(&self) -> i32 {
        self.new - self.old
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingEngine {
    k_factor: f64,
}

impl RatingEngine {
    pub fn new(k_factor: f64) -> Self {
        Self { k_factor }
    }

    pub fn k_factor(&self) -> f64 {
        self.k_factor
    }

    /// Expected score of a rating pool `a` against pool `b`
    pub fn expected(a: f64, b: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((b - a) / 400.0))
    }

    /// New ratings for every rostered player
    pub fn compute(&self, teams: &[TeamRoster], winners: &[TeamNumber]) -> Vec<RatingChange> {
        let teams: Vec<&TeamRoster> = teams.iter().filter(|t| !t.players.is_empty()).collect();
        let mut changes = Vec::new();

        for team in &teams {
            let won = winners.contains(&team.team);
            let mut total = 0.0;
            let mut decisive = 0usize;

            for other in &teams {
                if other.team == team.team || winners.contains(&other.team) == won {
                    continue;
                }
                let score = if won { 1.0 } else { 0.0 };
                total += score - Self::expected(team.average(), other.average());
                decisive += 1;
            }

            let delta = if decisive == 0 {
                0
            } else {
                (self.k_factor * total / decisive as f64).round() as i32
            };

            changes.extend(team.players.iter().map(|(player, old)| RatingChange {
                player: *player,
                old: *old,
                new: old + delta,
            }));
        }

        changes
    }
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_K_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(n: u8, players: &[(u64, i32)]) -> TeamRoster {
        TeamRoster {
            team: TeamNumber(n),
            players: players.iter().map(|(p, r)| (PlayerId(*p), *r)).collect(),
        }
    }

    #[test]
    fn test_equal_teams_move_by_half_k() {
        let engine = RatingEngine::default();
        let changes = engine.compute(
            &[team(1, &[(1, 1200), (2, 1200)]), team(2, &[(3, 1200), (4, 1200)])],
            &[TeamNumber(1)],
        );
        let delta = |p: u64| changes.iter().find(|c| c.player == PlayerId(p)).unwrap().delta();
        assert_eq!(delta(1), 16);
        assert_eq!(delta(2), 16);
        assert_eq!(delta(3), -16);
        assert_eq!(delta(4), -16);
    }

    #[test]
    fn test_update_is_symmetric_for_uneven_pools() {
        let engine = RatingEngine::new(32.0);
        let changes = engine.compute(
            &[team(1, &[(1, 1400)]), team(2, &[(2, 1100)])],
            &[TeamNumber(2)],
        );
        let sum: i32 = changes.iter().map(|c| c.delta()).sum();
        assert_eq!(sum, 0);
        assert!(changes[1].delta() > 16);
    }

    #[test]
    fn test_no_winners_changes_nothing() {
        let engine = RatingEngine::default();
        let changes = engine.compute(&[team(1, &[(1, 1300)]), team(2, &[(2, 1100)])], &[]);
        assert!(changes.iter().all(|c| c.delta() == 0));
    }
}
