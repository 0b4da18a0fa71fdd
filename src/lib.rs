//! Blockfall (workspace facade crate).
//!
//! Re-exports the member crates under `blockfall::{adapter,core,engine,types}`;
//! the implementation lives in dedicated crates under `crates/`.

pub use blockfall_adapter as adapter;
pub use blockfall_core as core;
pub use blockfall_engine as engine;
pub use blockfall_types as types;
