//! Engine module - tables, rounds and per-seat loops
//!
//! Everything time-driven lives here. The core crate simulates a single board
//! synchronously; this crate runs many of them concurrently on tokio.
//!
//! # Module Structure
//!
//! - [`config`]: round timings, thresholds and tick speeds
//! - [`error`]: typed command and transition failures
//! - [`bus`]: topic-scoped event bus consumed by transports
//! - [`fade`]: cancelable fade-acknowledgement handshake
//! - [`player_loop`]: one tokio task per playing seat
//! - [`round`]: round counters and roster
//! - [`table`]: seats, membership, invitations and access rules
//! - [`orchestrator`]: the per-table round state machine
//! - [`registry`]: rooms and live tables of one process
//! - [`matchmaker`]: "play now" table and seat selection
//! - [`rating`]: team rating update after rated rounds
//! - [`store`] / [`notify`]: persistence and notification collaborators
//! - [`lobby`]: the command facade transports call into
//!
//! # Concurrency
//!
//! - Each table has its own orchestrator behind a mutex plus a driver task
//!   ticking it once per second
//! - Each playing seat runs its own loop; the only shared state between loops
//!   is the partner board, always locked lower seat first
//! - Cross-seat effects travel as fire-and-forget messages with unique ids
//! - Destroying a table cancels its token tree, stopping every loop and timer

pub mod bus;
pub mod config;
pub mod error;
pub mod fade;
pub mod lobby;
pub mod matchmaker;
pub mod notify;
pub mod orchestrator;
pub mod player_loop;
pub mod rating;
pub mod registry;
pub mod round;
pub mod services;
pub mod store;
pub mod table;

pub use blockfall_core as core;
pub use blockfall_types as types;

pub use bus::{Envelope, EventBus, GameEvent, SeatView, Subscription, Topic};
pub use config::{GameConfig, TickSpeeds};
pub use error::{CommandError, TransitionError};
pub use fade::{FadeGate, FadeResult};
pub use lobby::Lobby;
pub use matchmaker::{choose_seat, rank_tables, SeatMatchmaker, TableSummary};
pub use notify::{BusNotifier, Notification, Notifier};
pub use orchestrator::{Orchestrator, SharedOrchestrator};
pub use player_loop::{
    LandingPermit, LoopDirectory, LoopPeer, LoopState, SeatReport, SharedBoard,
};
pub use rating::{RatingChange, RatingEngine, TeamRoster};
pub use registry::{Registry, TableHandle};
pub use round::{PlayerResult, RosterEntry, Round, RoundResult};
pub use services::Services;
pub use store::{InMemoryStore, PlayerRecord, PlayerStore, RoomRecord, TableRecord, TableStore};
pub use table::{Seat, Table};
