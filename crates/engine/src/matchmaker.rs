//! Seat matchmaking ("play now")
//!
//! Candidate tables in a room are public, not mid-round, and do not already
//! hold the player. The emptiest wins; a new public table is created when none
//! qualifies. Within a table, seats of teams nobody occupies are preferred,
//! each tier walked in [`SEAT_PRIORITY`] order.

use std::sync::Arc;

use tracing::debug;

use crate::error::CommandError;
use crate::orchestrator::Orchestrator;
use crate::registry::Registry;
use crate::table::Table;
use crate::types::{PlayerId, RoomId, RoundState, SeatNumber, TableId, Visibility, SEAT_PRIORITY};

/// What matchmaking needs to know about a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSummary {
    pub id: TableId,
    pub visibility: Visibility,
    pub state: RoundState,
    pub occupied: usize,
    pub has_player: bool,
}

impl TableSummary {
    pub fn of(table: &Table, player: PlayerId) -> Self {
        Self {
            id: table.id,
            visibility: table.visibility,
            state: table.round.state(),
            occupied: table.occupied_count(),
            has_player: table.is_member(player),
        }
    }

    fn qualifies(&self) -> bool {
        self.visibility == Visibility::Public && self.state != RoundState::Playing && !self.has_player
    }
}

/// Qualifying tables, emptiest first (ties by id)
pub fn rank_tables(tables: &[TableSummary]) -> Vec<TableId> {
    let mut candidates: Vec<&TableSummary> = tables.iter().filter(|t| t.qualifies()).collect();
    candidates.sort_by_key(|t| (t.occupied, t.id));
    candidates.into_iter().map(|t| t.id).collect()
}

/// Best free seat: first a seat of an empty team, else any free seat
pub fn choose_seat(table: &Table) -> Result<SeatNumber, CommandError> {
    let occupied_teams = table.occupied_teams();
    let free: Vec<SeatNumber> = SEAT_PRIORITY
        .iter()
        .filter_map(|n| SeatNumber::new(*n))
        .filter(|s| table.seat(*s).is_empty())
        .collect();

    free.iter()
        .find(|s| !occupied_teams.contains(&s.team()))
        .or_else(|| free.first())
        .copied()
        .ok_or(CommandError::NoSeatAvailable)
}

#[derive(Debug, Clone)]
pub struct SeatMatchmaker {
    registry: Arc<Registry>,
}

impl SeatMatchmaker {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Find or create a table in `room` and seat the player
    pub fn play_now(
        &self,
        room: RoomId,
        player: PlayerId,
    ) -> Result<(TableId, SeatNumber), CommandError> {
        let handles = self.registry.tables_in_room(room)?;
        let summaries: Vec<TableSummary> = handles
            .iter()
            .map(|h| TableSummary::of(h.orchestrator().lock().table(), player))
            .collect();

        for id in rank_tables(&summaries) {
            let Ok(handle) = self.registry.get(id) else {
                continue;
            };
            let mut orchestrator = handle.orchestrator().lock();
            // Re-check under the lock: the table may have changed since ranking
            if !TableSummary::of(orchestrator.table(), player).qualifies() {
                continue;
            }
            match Self::seat_player(&mut orchestrator, player) {
                Ok(seat) => return Ok((id, seat)),
                Err(err) => debug!(table = %id, player = %player, %err, "play now skipped table"),
            }
        }

        let handle = self
            .registry
            .create_table(room, Visibility::Public, true)?;
        let mut orchestrator = handle.orchestrator().lock();
        let seat = Self::seat_player(&mut orchestrator, player)?;
        Ok((handle.id, seat))
    }

    fn seat_player(
        orchestrator: &mut Orchestrator,
        player: PlayerId,
    ) -> Result<SeatNumber, CommandError> {
        let seat = choose_seat(orchestrator.table())?;
        let table = orchestrator.table_mut();
        table.join(player)?;
        if let Err(err) = table.sit(player, seat) {
            table.leave(player);
            return Err(err);
        }
        orchestrator.publish_table();
        Ok(seat)
    }
}
