//! Command and state machine error types

use thiserror::Error;

use crate::types::{PlayerId, RoomId, RoundState, SeatNumber, TableId};

/// Validation failure returned to the caller of a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Seat already occupied
    #[error("seat {0} is taken")]
    SeatTaken(SeatNumber),

    /// Table access rules refuse the player
    #[error("access denied to table {0}")]
    AccessDenied(TableId),

    /// Host-only command from a non-host
    #[error("player {0} is not the host")]
    NotHost(PlayerId),

    /// Seat-scoped command from a player without a seat
    #[error("player {0} is not seated")]
    NotSeated(PlayerId),

    /// Not enough ready teams for the requested action
    #[error("not enough ready teams")]
    InsufficientReadiness,

    /// Protected/private table needs an invitation
    #[error("player {0} has no invitation")]
    InvitationMissing(PlayerId),

    /// Every seat is taken
    #[error("no seat available")]
    NoSeatAvailable,

    #[error("table not found: {0}")]
    TableNotFound(TableId),

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("player not found: {0}")]
    PlayerNotFound(PlayerId),

    /// Command not allowed while a round is running
    #[error("round in progress")]
    RoundInProgress,

    /// Input dropped because the seat is locked, stopped or not playing
    #[error("input rejected: {0}")]
    InputRejected(&'static str),
}

impl CommandError {
    /// Stable wire code
    pub fn error_code(&self) -> &'static str {
        match self {
            CommandError::SeatTaken(_) => "seat_taken",
            CommandError::AccessDenied(_) => "access_denied",
            CommandError::NotHost(_) => "not_host",
            CommandError::NotSeated(_) => "not_seated",
            CommandError::InsufficientReadiness => "insufficient_readiness",
            CommandError::InvitationMissing(_) => "invitation_missing",
            CommandError::NoSeatAvailable => "no_seat_available",
            CommandError::TableNotFound(_) => "table_not_found",
            CommandError::RoomNotFound(_) => "room_not_found",
            CommandError::PlayerNotFound(_) => "player_not_found",
            CommandError::RoundInProgress => "round_in_progress",
            CommandError::InputRejected(_) => "input_rejected",
        }
    }
}

/// Attempted round edge that the state machine does not have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal round transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: RoundState,
    pub to: RoundState,
}
