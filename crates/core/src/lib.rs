//! Board simulation module - pure, deterministic, and testable
//!
//! This crate contains the per-seat simulation: grid, cascade resolution,
//! piece generation, the power bar and the ability catalog.
//! It has **no dependencies** on networking, timers or I/O, making it:
//!
//! - **Deterministic**: Same seed produces the same pieces and ability outcomes
//! - **Testable**: Every rule can be exercised on a hand-built board
//! - **Embeddable**: The async round loop drives it step by step
//!
//! # Module Structure
//!
//! - [`board`]: grid storage, collision, placement, gravity, game-over checks
//! - [`cascade`]: the landing pipeline (detect, fade, remove, gravity, repeat)
//! - [`detect`]: pluggable chain and color-match detectors
//! - [`pieces`]: the 3-block falling piece
//! - [`rng`]: seeded RNG and the per-seat piece queue
//! - [`power_bar`]: earned ability items
//! - [`powers`]: ability effects keyed by letter or diamond
//! - [`snapshot`]: serializable seat state for broadcasting
//!
//! # Example
//!
//! ```
//! use blockfall_core::{Board, BoardConfig, Detectors};
//!
//! let config = BoardConfig::default();
//! let mut board = Board::from_rows(config, &["YYY..."]);
//! let outcome = board.process_landed_piece(None, &Detectors::default(), |_, _| {});
//!
//! assert_eq!(outcome.removed_own, 3);
//! assert!(!board.has_pending());
//! ```

pub mod board;
pub mod cascade;
pub mod detect;
pub mod pieces;
pub mod power_bar;
pub mod powers;
pub mod rng;
pub mod snapshot;

pub use blockfall_types as types;

// Re-export commonly used types for convenience
pub use board::{Board, BoardConfig, PartnerLink, RemovedBlocks};
pub use cascade::{FadeTarget, Landing, LandingOutcome, RemovalBatch};
pub use detect::{
    ChainDetector, Detectors, GridView, LineMatchDetector, MatchDetector, MergedGrid, Owner,
    WordChainDetector,
};
pub use pieces::Piece;
pub use power_bar::PowerBar;
pub use powers::{EffectContext, EffectKey, EffectOutcome, PowerEffectRegistry};
pub use rng::{GeneratorConfig, PieceGenerator, SimpleRng};
pub use snapshot::{BoardSnapshot, SeatSnapshot};
