//! Table model: seats, membership, invitations and access rules
//!
//! A table is a plain data structure; it never spawns tasks. The orchestrator
//! owns one and drives its [`Round`].

use std::collections::BTreeSet;

use blockfall_core::Board;

use crate::bus::SeatView;
use crate::error::CommandError;
use crate::player_loop::SharedBoard;
use crate::round::Round;
use crate::store::TableRecord;
use crate::types::{PlayerId, RoomId, RoundState, SeatNumber, TableId, TeamNumber, Visibility};

#[derive(Debug, Clone)]
pub struct Seat {
    pub number: SeatNumber,
    pub player: Option<PlayerId>,
    pub ready: bool,
    /// Present from round start until reset
    pub board: Option<SharedBoard>,
}

impl Seat {
    fn new(number: SeatNumber) -> Self {
        Self {
            number,
            player: None,
            ready: false,
            board: None,
        }
    }

    pub fn team(&self) -> TeamNumber {
        self.number.team()
    }

    pub fn is_empty(&self) -> bool {
        self.player.is_none()
    }

    fn vacate(&mut self) {
        self.player = None;
        self.ready = false;
    }
}

#[derive(Debug)]
pub struct Table {
    pub id: TableId,
    pub room: RoomId,
    host: Option<PlayerId>,
    pub visibility: Visibility,
    pub rated: bool,
    seats: Vec<Seat>,
    /// Everyone at the table, seated or watching
    members: BTreeSet<PlayerId>,
    invitations: BTreeSet<PlayerId>,
    pub round: Round,
}

impl Table {
    pub fn new(id: TableId, room: RoomId, visibility: Visibility, rated: bool) -> Self {
        Self {
            id,
            room,
            host: None,
            visibility,
            rated,
            seats: SeatNumber::all().map(Seat::new).collect(),
            members: BTreeSet::new(),
            invitations: BTreeSet::new(),
            round: Round::new(),
        }
    }

    pub fn host(&self) -> Option<PlayerId> {
        self.host
    }

    pub fn is_host(&self, player: PlayerId) -> bool {
        self.host == Some(player)
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn seat(&self, number: SeatNumber) -> &Seat {
        &self.seats[number.index()]
    }

    pub fn seat_mut(&mut self, number: SeatNumber) -> &mut Seat {
        &mut self.seats[number.index()]
    }

    pub fn members(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.members.iter().copied()
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.members.contains(&player)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_invited(&self, player: PlayerId) -> bool {
        self.invitations.contains(&player)
    }

    pub fn seat_of(&self, player: PlayerId) -> Option<SeatNumber> {
        self.seats
            .iter()
            .find(|s| s.player == Some(player))
            .map(|s| s.number)
    }

    pub fn occupied_count(&self) -> usize {
        self.seats.iter().filter(|s| !s.is_empty()).count()
    }

    /// Teams with at least one occupied seat
    pub fn occupied_teams(&self) -> BTreeSet<TeamNumber> {
        self.seats
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.team())
            .collect()
    }

    /// Teams with at least one seated, ready player
    pub fn ready_teams(&self) -> BTreeSet<TeamNumber> {
        self.seats
            .iter()
            .filter(|s| !s.is_empty() && s.ready)
            .map(|s| s.team())
            .collect()
    }

    /// Whether `player` may enter the table at all
    pub fn can_join(&self, player: PlayerId) -> bool {
        self.is_member(player)
            || self.is_empty()
            || self.is_host(player)
            || matches!(self.visibility, Visibility::Public | Visibility::Protected)
            || self.is_invited(player)
    }

    /// Whether `player` may take a seat (after joining)
    pub fn can_sit(&self, player: PlayerId) -> bool {
        match self.visibility {
            Visibility::Public => true,
            Visibility::Protected | Visibility::Private => {
                self.is_host(player) || self.is_invited(player)
            }
        }
    }

    pub fn join(&mut self, player: PlayerId) -> Result<(), CommandError> {
        if !self.can_join(player) {
            return Err(CommandError::AccessDenied(self.id));
        }
        if self.host.is_none() {
            self.host = Some(player);
        }
        self.members.insert(player);
        Ok(())
    }

    /// Take `seat`. A player holding another seat moves.
    pub fn sit(&mut self, player: PlayerId, seat: SeatNumber) -> Result<(), CommandError> {
        if !self.is_member(player) {
            return Err(CommandError::NotSeated(player));
        }
        if !self.can_sit(player) {
            return Err(CommandError::InvitationMissing(player));
        }
        match self.seat(seat).player {
            Some(p) if p == player => return Ok(()),
            Some(_) => return Err(CommandError::SeatTaken(seat)),
            None => {}
        }
        if let Some(current) = self.seat_of(player) {
            self.seat_mut(current).vacate();
        }
        self.seat_mut(seat).player = Some(player);
        Ok(())
    }

    /// Leave the seat but stay at the table. Returns the vacated seat.
    pub fn stand(&mut self, player: PlayerId) -> Result<SeatNumber, CommandError> {
        let seat = self.seat_of(player).ok_or(CommandError::NotSeated(player))?;
        self.seat_mut(seat).vacate();
        Ok(seat)
    }

    pub fn set_ready(&mut self, player: PlayerId, ready: bool) -> Result<SeatNumber, CommandError> {
        let seat = self.seat_of(player).ok_or(CommandError::NotSeated(player))?;
        self.seat_mut(seat).ready = ready;
        Ok(seat)
    }

    /// Remove the player entirely. Returns the seat they held, if any.
    pub fn leave(&mut self, player: PlayerId) -> Option<SeatNumber> {
        let seat = self.seat_of(player);
        if let Some(seat) = seat {
            self.seat_mut(seat).vacate();
        }
        self.members.remove(&player);
        if self.is_host(player) {
            self.migrate_host();
        }
        seat
    }

    /// Hand the host role to the lowest seated member, else any watcher
    fn migrate_host(&mut self) {
        self.host = self
            .seats
            .iter()
            .find_map(|s| s.player)
            .or_else(|| self.members.iter().next().copied());
    }

    pub fn invite(&mut self, host: PlayerId, player: PlayerId) -> Result<(), CommandError> {
        if !self.is_host(host) {
            return Err(CommandError::NotHost(host));
        }
        self.invitations.insert(player);
        Ok(())
    }

    /// Remove the player's seat, membership and invitation
    pub fn boot(
        &mut self,
        host: PlayerId,
        player: PlayerId,
    ) -> Result<Option<SeatNumber>, CommandError> {
        if !self.is_host(host) {
            return Err(CommandError::NotHost(host));
        }
        if host == player {
            return Err(CommandError::InputRejected("host cannot boot themselves"));
        }
        if !self.is_member(player) {
            return Err(CommandError::PlayerNotFound(player));
        }
        self.invitations.remove(&player);
        Ok(self.leave(player))
    }

    pub fn update_settings(
        &mut self,
        host: PlayerId,
        visibility: Option<Visibility>,
        rated: Option<bool>,
    ) -> Result<(), CommandError> {
        if !self.is_host(host) {
            return Err(CommandError::NotHost(host));
        }
        if self.round.state() == RoundState::Playing {
            return Err(CommandError::RoundInProgress);
        }
        if let Some(visibility) = visibility {
            self.visibility = visibility;
        }
        if let Some(rated) = rated {
            self.rated = rated;
        }
        Ok(())
    }

    /// Fresh boards for every occupied seat
    pub fn init_boards(&mut self) {
        for seat in &mut self.seats {
            seat.board = seat
                .player
                .map(|_| std::sync::Arc::new(parking_lot::Mutex::new(Board::new())));
        }
    }

    pub fn clear_boards(&mut self) {
        for seat in &mut self.seats {
            seat.board = None;
        }
    }

    pub fn clear_ready(&mut self) {
        for seat in &mut self.seats {
            seat.ready = false;
        }
    }

    pub fn seat_views(&self) -> Vec<SeatView> {
        self.seats
            .iter()
            .map(|s| SeatView {
                seat: s.number,
                player: s.player,
                ready: s.ready,
            })
            .collect()
    }

    pub fn record(&self) -> TableRecord {
        TableRecord {
            id: self.id,
            room: self.room,
            host: self.host,
            visibility: self.visibility,
            rated: self.rated,
        }
    }
}
