//! Per-table round orchestration
//!
//! The [`Orchestrator`] owns a [`Table`] and drives its round through
//! WAITING → COUNTDOWN → PLAYING → GAME_OVER → WAITING. All of its methods are
//! synchronous; a driver task ([`spawn_table_driver`]) feeds it one-second
//! ticks and seat reports, and the lobby calls it for commands.
//!
//! Seat loops never touch the orchestrator directly. They report eliminations
//! over a channel, so the orchestrator lock is never held across a seat's
//! landing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blockfall_core::PartnerLink;

use crate::bus::{GameEvent, Topic};
use crate::notify::Notification;
use crate::player_loop::{
    spawn_player_loop, LandingPermit, LoopDirectory, LoopSetup, SeatReport,
};
use crate::rating::TeamRoster;
use crate::round::{PlayerResult, RosterEntry, RoundResult};
use crate::services::Services;
use crate::table::Table;
use crate::types::{PlayerId, RoundState, SeatNumber, TableId, TeamNumber};

pub type SharedOrchestrator = Arc<Mutex<Orchestrator>>;

#[derive(Debug)]
pub struct Orchestrator {
    table: Table,
    services: Arc<Services>,
    directory: Arc<LoopDirectory>,
    reports: mpsc::UnboundedSender<SeatReport>,
    /// Cancelled when the table is destroyed
    table_cancel: CancellationToken,
    /// Cancelled when the current round's loops must stop
    round_cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        table: Table,
        services: Arc<Services>,
        reports: mpsc::UnboundedSender<SeatReport>,
        table_cancel: CancellationToken,
    ) -> Self {
        let round_cancel = table_cancel.child_token();
        Self {
            table,
            services,
            directory: Arc::new(LoopDirectory::new()),
            reports,
            table_cancel,
            round_cancel,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn id(&self) -> TableId {
        self.table.id
    }

    pub fn state(&self) -> RoundState {
        self.table.round.state()
    }

    pub fn directory(&self) -> &Arc<LoopDirectory> {
        &self.directory
    }

    fn publish(&self, event: GameEvent) {
        self.services.bus.publish(Topic::Table(self.table.id), event);
    }

    pub fn publish_table(&self) {
        self.publish(GameEvent::TableChanged {
            table: self.table.id,
            host: self.table.host(),
            seats: self.table.seat_views(),
        });
    }

    fn publish_round_state(&self) {
        self.publish(GameEvent::RoundState {
            table: self.table.id,
            state: self.state(),
        });
    }

    fn set_state(&mut self, next: RoundState) -> bool {
        match self.table.round.transition(next) {
            Ok(()) => {
                info!(table = %self.table.id, state = next.as_str(), "round state");
                self.publish_round_state();
                true
            }
            Err(err) => {
                warn!(table = %self.table.id, %err, "round transition refused");
                false
            }
        }
    }

    fn ready_roster(&self) -> Vec<RosterEntry> {
        self.table
            .seats()
            .iter()
            .filter(|s| s.ready)
            .filter_map(|s| {
                s.player.map(|player| RosterEntry {
                    player,
                    seat: s.number,
                    team: s.team(),
                })
            })
            .collect()
    }

    fn readiness_met(&self) -> bool {
        self.table.ready_teams().len() >= self.services.config.required_teams()
    }

    /// Re-evaluate readiness after a seat or ready flag changed
    pub fn on_ready_changed(&mut self) {
        match self.state() {
            RoundState::Waiting if self.readiness_met() => self.start_countdown(),
            RoundState::Countdown if !self.readiness_met() => self.abort_countdown(),
            RoundState::Countdown => {
                let roster = self.ready_roster();
                self.table.round.set_roster(roster);
            }
            _ => {}
        }
    }

    fn start_countdown(&mut self) {
        if !self.set_state(RoundState::Countdown) {
            return;
        }
        let secs = self.services.config.countdown_secs;
        let roster = self.ready_roster();
        self.table.round.set_remaining(secs);
        self.table.round.set_roster(roster);
        self.publish(GameEvent::Countdown {
            table: self.table.id,
            remaining: secs,
        });
    }

    /// Readiness dropped mid-countdown: straight to GAME_OVER, then WAITING
    fn abort_countdown(&mut self) {
        info!(table = %self.table.id, "countdown cancelled");
        self.table.round.clear_roster();
        if self.set_state(RoundState::GameOver) {
            self.reset_round();
        }
    }

    /// One-second tick from the driver
    pub fn on_second(&mut self) {
        match self.state() {
            RoundState::Waiting => {}
            RoundState::Countdown => {
                let remaining = self.table.round.count_down();
                self.publish(GameEvent::Countdown {
                    table: self.table.id,
                    remaining,
                });
                if remaining == 0 {
                    self.start_playing();
                }
            }
            RoundState::Playing => {
                self.table.round.tick_elapsed();
                self.fix_roster_if_due();
                self.check_round_over();
            }
            RoundState::GameOver => {
                if self.table.round.count_down() == 0 {
                    self.reset_round();
                }
            }
        }
    }

    fn past_grace(&self) -> bool {
        self.table.round.elapsed() >= self.services.config.grace_secs
    }

    /// Freeze the roster once the grace period is over
    fn fix_roster_if_due(&mut self) {
        if self.past_grace() && !self.table.round.roster_fixed() {
            debug!(table = %self.table.id, "grace period over, roster fixed");
            self.table.round.fix_roster();
        }
    }

    fn seed_for(&self, seat: SeatNumber) -> u32 {
        match self.services.config.seed {
            Some(seed) => seed
                ^ (self.table.id.0 as u32).wrapping_mul(0x9e37_79b9)
                ^ (seat.get() as u32).wrapping_mul(0x85eb_ca6b),
            None => Uuid::new_v4().as_u128() as u32,
        }
    }

    fn start_playing(&mut self) {
        if !self.set_state(RoundState::Playing) {
            return;
        }
        self.round_cancel = self.table_cancel.child_token();
        self.table.init_boards();

        let roster = self.ready_roster();
        let playing: Vec<SeatNumber> = roster.iter().map(|e| e.seat).collect();

        // Partners are linked only when both seats have a loop
        for &seat in &playing {
            let partner = seat.partner();
            if !playing.contains(&partner) {
                continue;
            }
            if let Some(board) = &self.table.seat(seat).board {
                board.lock().set_partner(Some(PartnerLink {
                    seat: partner,
                    side: partner.side(),
                }));
            }
        }

        let mut permits: BTreeMap<TeamNumber, LandingPermit> = BTreeMap::new();
        for entry in &roster {
            let Some(board) = self.table.seat(entry.seat).board.clone() else {
                continue;
            };
            let permit = Arc::clone(permits.entry(entry.seat.team()).or_default());
            let partner_seat = entry.seat.partner();
            let partner = if playing.contains(&partner_seat) {
                self.table
                    .seat(partner_seat)
                    .board
                    .clone()
                    .map(|b| (partner_seat, b))
            } else {
                None
            };

            spawn_player_loop(
                LoopSetup {
                    table: self.table.id,
                    seat: entry.seat,
                    player: entry.player,
                    board,
                    partner,
                    permit,
                    seed: self.seed_for(entry.seat),
                },
                Arc::clone(&self.services),
                Arc::clone(&self.directory),
                self.reports.clone(),
                self.round_cancel.child_token(),
            );
        }

        info!(table = %self.table.id, seats = roster.len(), "round started");
        self.table.round.set_roster(roster);
        self.fix_roster_if_due();
    }

    /// A seat loop reported in
    pub fn on_report(&mut self, report: SeatReport) {
        match report {
            SeatReport::GameOver { seat, player } => {
                debug!(table = %self.table.id, seat = %seat, player = %player, "seat eliminated");
                if self.state() == RoundState::Playing {
                    self.check_round_over();
                }
            }
        }
    }

    /// End the round if too few teams are still playing.
    ///
    /// A round that started with several teams also ends once a single team
    /// is left standing.
    fn check_round_over(&mut self) {
        if self.state() != RoundState::Playing {
            return;
        }
        let active = self.directory.active_teams();
        let started = self.table.round.roster_teams().len();
        let required = self.services.config.required_teams();
        let over = active.len() < required || (started > 1 && active.len() <= 1);
        if !over {
            return;
        }

        if self.past_grace() {
            self.end_round(active);
        } else {
            self.table.round.clear_roster();
            self.end_round(Vec::new());
        }
    }

    /// A player left their seat (stand, leave or boot)
    pub fn on_departure(&mut self, player: PlayerId, seat: SeatNumber) {
        match self.state() {
            RoundState::Countdown => {
                self.table.round.remove_from_roster(player);
                self.on_ready_changed();
            }
            RoundState::Playing => {
                if let Some(peer) = self.directory.remove(seat) {
                    peer.stop();
                }
                self.unlink(seat);
                if !self.past_grace() {
                    self.table.round.remove_from_roster(player);
                }
                self.check_round_over();
            }
            RoundState::Waiting | RoundState::GameOver => {}
        }
    }

    fn unlink(&self, seat: SeatNumber) {
        for s in [seat, seat.partner()] {
            if let Some(board) = &self.table.seat(s).board {
                board.lock().set_partner(None);
            }
        }
    }

    fn end_round(&mut self, winners: Vec<TeamNumber>) {
        if !self.set_state(RoundState::GameOver) {
            return;
        }
        self.round_cancel.cancel();
        self.directory.stop_all();

        let table_id = self.table.id;
        let past_grace = self.past_grace();
        let rated = self.table.rated && past_grace;
        let roster = self.table.round.roster().to_vec();
        let players = &self.services.players;

        let before: Vec<(RosterEntry, i32)> = roster
            .iter()
            .map(|e| (*e, players.rating(e.player)))
            .collect();

        if past_grace {
            for entry in &roster {
                players.record_result(entry.player, winners.contains(&entry.team));
            }
        }

        let mut after = std::collections::HashMap::new();
        if rated {
            let mut teams: Vec<TeamRoster> = Vec::new();
            for (entry, rating) in &before {
                match teams.iter_mut().find(|t| t.team == entry.team) {
                    Some(t) => t.players.push((entry.player, *rating)),
                    None => teams.push(TeamRoster {
                        team: entry.team,
                        players: vec![(entry.player, *rating)],
                    }),
                }
            }

            for change in self.services.rating.compute(&teams, &winners) {
                if let Some(mut record) = players.find_player(change.player) {
                    record.rating = change.new;
                    players.upsert_player(record);
                }
                self.services.notifier.notify(
                    change.player,
                    Notification::RatingChanged {
                        table: table_id,
                        old: change.old,
                        new: change.new,
                    },
                );
                after.insert(change.player, change.new);
            }

            for entry in roster.iter().filter(|e| winners.contains(&e.team)) {
                let code = Uuid::new_v4().simple().to_string();
                if let Some(mut record) = players.find_player(entry.player) {
                    record.reward_codes.push(code.clone());
                    players.upsert_player(record);
                }
                self.services.notifier.notify(
                    entry.player,
                    Notification::RewardCode {
                        table: table_id,
                        code,
                    },
                );
            }
        }

        let result = RoundResult {
            winners: winners.clone(),
            elapsed_secs: self.table.round.elapsed(),
            rated,
            players: before
                .iter()
                .map(|(entry, rating)| PlayerResult {
                    player: entry.player,
                    team: entry.team,
                    won: winners.contains(&entry.team),
                    rating_before: rated.then_some(*rating),
                    rating_after: after.get(&entry.player).copied(),
                })
                .collect(),
        };

        info!(
            table = %table_id,
            winners = ?winners,
            elapsed = result.elapsed_secs,
            rated,
            "round over"
        );
        self.table.round.set_winners(winners);
        self.publish(GameEvent::RoundResult {
            table: table_id,
            result,
        });

        let cooldown = self.services.config.cooldown_secs;
        self.table.round.set_remaining(cooldown);
        if cooldown == 0 {
            self.reset_round();
        }
    }

    fn reset_round(&mut self) {
        self.round_cancel.cancel();
        self.directory.stop_all();
        if let Err(err) = self.table.round.reset() {
            warn!(table = %self.table.id, %err, "round reset refused");
            return;
        }
        self.round_cancel = self.table_cancel.child_token();
        self.table.clear_boards();
        self.table.clear_ready();
        self.publish_round_state();
        self.publish_table();
    }

    /// Stop everything; the table is going away
    pub fn shutdown(&mut self) {
        self.table_cancel.cancel();
        self.directory.stop_all();
        self.table.clear_boards();
        debug!(table = %self.table.id, "table shut down");
    }
}

/// Drive an orchestrator: one-second ticks plus seat reports, until cancelled
pub fn spawn_table_driver(
    orchestrator: SharedOrchestrator,
    mut reports: mpsc::UnboundedReceiver<SeatReport>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(report) = reports.recv() => orchestrator.lock().on_report(report),
                _ = interval.tick() => orchestrator.lock().on_second(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::types::{RoomId, Visibility};

    fn seat(n: u8) -> SeatNumber {
        SeatNumber::new(n).unwrap()
    }

    fn orchestrator(config: GameConfig) -> Orchestrator {
        let services = Arc::new(Services::in_memory(config));
        let (tx, _rx) = mpsc::unbounded_channel();
        let table = Table::new(TableId(1), RoomId(1), Visibility::Public, true);
        Orchestrator::new(table, services, tx, CancellationToken::new())
    }

    fn seat_ready(o: &mut Orchestrator, player: u64, n: u8) {
        let t = o.table_mut();
        t.join(PlayerId(player)).unwrap();
        t.sit(PlayerId(player), seat(n)).unwrap();
        t.set_ready(PlayerId(player), true).unwrap();
        o.on_ready_changed();
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_needs_two_teams() {
        let mut o = orchestrator(GameConfig {
            test_mode: false,
            ..GameConfig::for_tests()
        });
        seat_ready(&mut o, 1, 1);
        seat_ready(&mut o, 2, 2);
        assert_eq!(o.state(), RoundState::Waiting);
        seat_ready(&mut o, 3, 3);
        assert_eq!(o.state(), RoundState::Countdown);
        assert_eq!(o.table().round.roster().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_cancels_countdown() {
        let mut o = orchestrator(GameConfig {
            test_mode: false,
            ..GameConfig::for_tests()
        });
        seat_ready(&mut o, 1, 1);
        seat_ready(&mut o, 2, 3);
        assert_eq!(o.state(), RoundState::Countdown);

        o.table_mut().set_ready(PlayerId(2), false).unwrap();
        o.on_ready_changed();
        assert_eq!(o.state(), RoundState::Waiting);
        assert!(o.table().round.roster().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_reaches_playing_and_links_partners() {
        let mut o = orchestrator(GameConfig::for_tests());
        seat_ready(&mut o, 1, 1);
        seat_ready(&mut o, 2, 2);
        for _ in 0..3 {
            o.on_second();
        }
        assert_eq!(o.state(), RoundState::Playing);
        assert_eq!(o.directory().len(), 2);

        let board = o.table().seat(seat(1)).board.clone().unwrap();
        assert_eq!(board.lock().partner().map(|l| l.seat), Some(seat(2)));
        o.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_departure_in_grace_ends_without_winners() {
        let mut o = orchestrator(GameConfig {
            test_mode: false,
            ..GameConfig::for_tests()
        });
        seat_ready(&mut o, 1, 1);
        seat_ready(&mut o, 2, 3);
        for _ in 0..3 {
            o.on_second();
        }
        assert_eq!(o.state(), RoundState::Playing);

        let seat = o.table_mut().stand(PlayerId(2)).unwrap();
        o.on_departure(PlayerId(2), seat);
        assert_eq!(o.state(), RoundState::GameOver);
        assert!(o.table().round.winners().is_empty());
        assert_eq!(o.services.players.rating(PlayerId(1)), 1200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_grace_fixes_roster_at_start() {
        let mut o = orchestrator(GameConfig {
            test_mode: false,
            grace_secs: 0,
            ..GameConfig::for_tests()
        });
        seat_ready(&mut o, 1, 1);
        seat_ready(&mut o, 2, 3);
        for _ in 0..3 {
            o.on_second();
        }
        assert_eq!(o.state(), RoundState::Playing);
        assert!(o.table().round.roster_fixed());

        let seat = o.table_mut().stand(PlayerId(2)).unwrap();
        o.on_departure(PlayerId(2), seat);
        assert_eq!(o.state(), RoundState::GameOver);
        assert_eq!(o.table().round.winners(), &[TeamNumber(1)]);
        assert_eq!(o.table().round.roster().len(), 2);
    }
}
