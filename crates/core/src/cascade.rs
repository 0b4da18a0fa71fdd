//! Cascade module - resolves a landed piece
//!
//! A landing runs iterations until nothing is removed. Each iteration:
//!
//! 1. detects chains on the local board,
//! 2. detects color matches on the board merged with its partner (if linked),
//! 3. marks the union of both sets pending removal,
//! 4. waits for the client fade on every affected board,
//! 5. clears the pending cells and applies gravity.
//!
//! The steps are exposed separately through [`Landing`] so the round loop can
//! release board locks while it awaits the fade handshake.
//! [`Board::process_landed_piece`] runs the whole pipeline synchronously.
//!
//! # Chain forwarding
//!
//! The board's forward counter says how many future landings forward their
//! removed blocks to the opposing teams. The landing that creates a chain never
//! forwards; it sets the counter to 1 (plus one per additional simultaneous
//! chain). Each later landing that starts with a positive counter forwards
//! everything it removes and decrements the counter once when it finishes.

use std::collections::BTreeSet;

use crate::board::Board;
use crate::detect::{Detectors, MergedGrid};
use crate::types::{Block, Pos, PowerBarItem};

/// Board affected by a removal batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FadeTarget {
    Own,
    Partner,
}

/// Cells marked pending in one iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalBatch {
    pub own: Vec<Pos>,
    pub partner: Vec<Pos>,
    /// Chain occurrences found in this iteration
    pub chains: usize,
}

impl RemovalBatch {
    pub fn is_empty(&self) -> bool {
        self.own.is_empty() && self.partner.is_empty()
    }
}

/// Result of a full landing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandingOutcome {
    /// Blocks removed from this board that go to opponents
    pub forwarded_own: Vec<Block>,
    /// Blocks removed from the partner board that go to opponents
    pub forwarded_partner: Vec<Block>,
    pub chain_occurred: bool,
    pub chains: usize,
    pub earned_own: Vec<PowerBarItem>,
    pub earned_partner: Vec<PowerBarItem>,
    pub removed_own: usize,
    pub removed_partner: usize,
    pub iterations: usize,
}

impl LandingOutcome {
    pub fn forwarded(&self) -> impl Iterator<Item = &Block> {
        self.forwarded_own.iter().chain(self.forwarded_partner.iter())
    }
}

/// In-progress landing on one board
#[derive(Debug)]
pub struct Landing {
    forwarding: bool,
    chain_counted: bool,
    outcome: LandingOutcome,
}

impl Landing {
    /// Start a landing. Forwarding is decided once, from the counter at this point.
    pub fn begin(own: &Board) -> Self {
        Self {
            forwarding: own.forward_remaining() > 0,
            chain_counted: false,
            outcome: LandingOutcome::default(),
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    /// Run both detectors and mark the union pending.
    ///
    /// Returns None when nothing is left to remove.
    pub fn detect(
        &mut self,
        detectors: &Detectors,
        own: &mut Board,
        partner: Option<&mut Board>,
    ) -> Option<RemovalBatch> {
        let chains = detectors.chain.detect(&*own);
        let chain_cells: BTreeSet<Pos> = chains.iter().flatten().copied().collect();

        let link = own.partner();
        let (own_matches, partner_matches) = match (&partner, link) {
            (Some(partner), Some(link)) => {
                let merged = MergedGrid::new(own, partner, link.side);
                let matched = detectors.matcher.detect(&merged);
                merged.split(&matched)
            }
            _ => (detectors.matcher.detect(&*own), Vec::new()),
        };

        let mut own_set = chain_cells.clone();
        own_set.extend(own_matches.iter().copied());

        // Only cells that actually got marked belong to the batch
        let own_marked: Vec<Pos> = own_set
            .into_iter()
            .filter(|pos| own.mark_pending(pos.row, pos.col))
            .collect();
        let partner_marked: Vec<Pos> = match partner {
            Some(partner) => {
                let unique: BTreeSet<Pos> = partner_matches.into_iter().collect();
                unique
                    .into_iter()
                    .filter(|pos| partner.mark_pending(pos.row, pos.col))
                    .collect()
            }
            None => Vec::new(),
        };

        let batch = RemovalBatch {
            own: own_marked,
            partner: partner_marked,
            chains: chains.len(),
        };
        if batch.is_empty() {
            return None;
        }
        own.record_detection(chain_cells.into_iter().collect(), own_matches);

        if !chains.is_empty() {
            self.outcome.chain_occurred = true;
            self.outcome.chains += chains.len();
            if !self.chain_counted {
                self.chain_counted = true;
                let base = own.forward_remaining().max(1);
                own.set_forward_remaining(base + chains.len() as u32 - 1);
            }
        }

        Some(batch)
    }

    /// Clear the batch's pending cells and apply gravity on both boards.
    ///
    /// Cells pending for another landing are left alone.
    pub fn resolve(&mut self, batch: &RemovalBatch, own: &mut Board, partner: Option<&mut Board>) {
        let removed = own.remove_cells(&batch.own);
        self.outcome.removed_own += removed.blocks.len();
        self.outcome.earned_own.extend(removed.earned);
        if self.forwarding {
            self.outcome
                .forwarded_own
                .extend(removed.blocks.iter().map(|(_, b)| b.without_power()));
        }
        own.shift_down_blocks();

        if let Some(partner) = partner {
            if !batch.partner.is_empty() {
                let removed = partner.remove_cells(&batch.partner);
                self.outcome.removed_partner += removed.blocks.len();
                self.outcome.earned_partner.extend(removed.earned);
                if self.forwarding {
                    self.outcome
                        .forwarded_partner
                        .extend(removed.blocks.iter().map(|(_, b)| b.without_power()));
                }
                partner.shift_down_blocks();
            }
        }

        self.outcome.iterations += 1;
    }

    /// Close the landing, consuming one forward if this landing forwarded
    pub fn finish(self, own: &mut Board) -> LandingOutcome {
        if self.forwarding {
            own.set_forward_remaining(own.forward_remaining().saturating_sub(1));
        }
        own.clear_detection();
        self.outcome
    }
}

impl Board {
    /// Resolve a landed piece to completion.
    ///
    /// `wait_for_fade` is called once per affected board per iteration, after
    /// cells are marked pending and before they are cleared. Every batch holds
    /// at least one marked block and every iteration removes its batch, so the
    /// loop terminates.
    pub fn process_landed_piece(
        &mut self,
        mut partner: Option<&mut Board>,
        detectors: &Detectors,
        mut wait_for_fade: impl FnMut(FadeTarget, &[Pos]),
    ) -> LandingOutcome {
        let mut landing = Landing::begin(self);
        while let Some(batch) = landing.detect(detectors, self, partner.as_deref_mut()) {
            if !batch.own.is_empty() {
                wait_for_fade(FadeTarget::Own, &batch.own);
            }
            if !batch.partner.is_empty() {
                wait_for_fade(FadeTarget::Partner, &batch.partner);
            }
            landing.resolve(&batch, self, partner.as_deref_mut());
        }
        landing.finish(self)
    }
}
