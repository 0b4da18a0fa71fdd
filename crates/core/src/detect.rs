//! Removal detectors
//!
//! A landing asks two detectors what to remove:
//!
//! - a [`ChainDetector`] looks at the local board only and reports each chain
//!   occurrence as its own list of cells,
//! - a [`MatchDetector`] reports color-match cells, possibly across a merged
//!   grid made of a board and its partner placed side by side.
//!
//! Both are object-safe so a table can swap in other rules. The defaults are
//! [`WordChainDetector`] and [`LineMatchDetector`].

use std::collections::BTreeSet;

use crate::board::Board;
use crate::types::{Block, Letter, Pos, Side};

/// Read-only grid access shared by boards and merged views
pub trait GridView {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    /// Block at (row, col), empty when out of bounds
    fn block(&self, row: usize, col: usize) -> Block;
    fn is_pending(&self, row: usize, col: usize) -> bool;

    /// Step from `pos` by (d_row, d_col), None when leaving the grid
    fn step(&self, pos: Pos, d_row: isize, d_col: isize) -> Option<Pos> {
        let row = pos.row as isize + d_row;
        let col = pos.col as isize + d_col;
        if row < 0 || col < 0 || row as usize >= self.rows() || col as usize >= self.cols() {
            return None;
        }
        Some(Pos::new(row as usize, col as usize))
    }
}

impl GridView for Board {
    fn rows(&self) -> usize {
        Board::rows(self)
    }

    fn cols(&self) -> usize {
        Board::cols(self)
    }

    fn block(&self, row: usize, col: usize) -> Block {
        Board::block(self, row, col)
    }

    fn is_pending(&self, row: usize, col: usize) -> bool {
        Board::is_pending(self, row, col)
    }
}

/// Which board a merged-grid column belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Own,
    Partner,
}

/// A board and its partner placed side by side.
///
/// The partner occupies the columns on its declared side.
#[derive(Debug, Clone, Copy)]
pub struct MergedGrid<'a> {
    own: &'a Board,
    partner: &'a Board,
    partner_side: Side,
}

impl<'a> MergedGrid<'a> {
    pub fn new(own: &'a Board, partner: &'a Board, partner_side: Side) -> Self {
        Self {
            own,
            partner,
            partner_side,
        }
    }

    /// Map a merged column back to its board and local column
    pub fn origin(&self, col: usize) -> (Owner, usize) {
        match self.partner_side {
            Side::Left => {
                let split = self.partner.cols();
                if col < split {
                    (Owner::Partner, col)
                } else {
                    (Owner::Own, col - split)
                }
            }
            Side::Right => {
                let split = self.own.cols();
                if col < split {
                    (Owner::Own, col)
                } else {
                    (Owner::Partner, col - split)
                }
            }
        }
    }

    fn board(&self, owner: Owner) -> &'a Board {
        match owner {
            Owner::Own => self.own,
            Owner::Partner => self.partner,
        }
    }

    /// Split merged positions into (own, partner) local positions
    pub fn split(&self, positions: &[Pos]) -> (Vec<Pos>, Vec<Pos>) {
        let mut own = Vec::new();
        let mut partner = Vec::new();
        for pos in positions {
            match self.origin(pos.col) {
                (Owner::Own, col) => own.push(Pos::new(pos.row, col)),
                (Owner::Partner, col) => partner.push(Pos::new(pos.row, col)),
            }
        }
        (own, partner)
    }
}

impl GridView for MergedGrid<'_> {
    fn rows(&self) -> usize {
        self.own.rows().min(self.partner.rows())
    }

    fn cols(&self) -> usize {
        self.own.cols() + self.partner.cols()
    }

    fn block(&self, row: usize, col: usize) -> Block {
        let (owner, local) = self.origin(col);
        self.board(owner).block(row, local)
    }

    fn is_pending(&self, row: usize, col: usize) -> bool {
        let (owner, local) = self.origin(col);
        self.board(owner).is_pending(row, local)
    }
}

/// Finds chain ("hoo") patterns on a single board
pub trait ChainDetector: Send + Sync {
    /// Each distinct chain occurrence as the list of its cells
    fn detect(&self, grid: &dyn GridView) -> Vec<Vec<Pos>>;
}

/// Finds color-match cells on a board or merged grid
pub trait MatchDetector: Send + Sync {
    /// All matched cells, each listed once
    fn detect(&self, grid: &dyn GridView) -> Vec<Pos>;
}

/// The spelled word `Y O U P I !` along a straight line.
///
/// Reading directions are left to right, bottom to top and the two upward
/// diagonals. Only regular blocks take part.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordChainDetector;

impl WordChainDetector {
    const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (-1, 0), (-1, 1), (-1, -1)];

    fn spells_from(grid: &dyn GridView, start: Pos, dir: (isize, isize)) -> Option<Vec<Pos>> {
        let mut cells = Vec::with_capacity(Letter::ALL.len());
        let mut pos = start;
        for (i, expected) in Letter::ALL.iter().enumerate() {
            if i > 0 {
                pos = grid.step(pos, dir.0, dir.1)?;
            }
            if grid.is_pending(pos.row, pos.col) {
                return None;
            }
            if grid.block(pos.row, pos.col).letter() != Some(*expected) {
                return None;
            }
            cells.push(pos);
        }
        Some(cells)
    }
}

impl ChainDetector for WordChainDetector {
    fn detect(&self, grid: &dyn GridView) -> Vec<Vec<Pos>> {
        let mut chains = Vec::new();
        for row in 0..grid.rows() {
            for col in 0..grid.cols() {
                if grid.block(row, col).letter() != Some(Letter::Y) {
                    continue;
                }
                for dir in Self::DIRECTIONS {
                    if let Some(cells) = Self::spells_from(grid, Pos::new(row, col), dir) {
                        chains.push(cells);
                    }
                }
            }
        }
        chains
    }
}

/// Runs of `min_run` or more same-letter cells in a row, column or diagonal.
///
/// Golden blocks match any letter, but a run made only of golden blocks does
/// not count. Stones, empty cells and cells already pending removal break a run.
#[derive(Debug, Clone, Copy)]
pub struct LineMatchDetector {
    pub min_run: usize,
}

impl Default for LineMatchDetector {
    fn default() -> Self {
        Self { min_run: 3 }
    }
}

impl LineMatchDetector {
    const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

    /// Longest run starting at `start` going along `dir`
    fn run_from(grid: &dyn GridView, start: Pos, dir: (isize, isize)) -> (Vec<Pos>, Option<Letter>) {
        let mut cells = Vec::new();
        let mut letter: Option<Letter> = None;
        let mut cursor = Some(start);

        while let Some(pos) = cursor {
            if grid.is_pending(pos.row, pos.col) {
                break;
            }
            match grid.block(pos.row, pos.col) {
                Block::Golden => {}
                Block::Regular { letter: l, .. } => match letter {
                    None => letter = Some(l),
                    Some(current) if current == l => {}
                    Some(_) => break,
                },
                Block::Empty | Block::Stone => break,
            }
            cells.push(pos);
            cursor = grid.step(pos, dir.0, dir.1);
        }

        (cells, letter)
    }
}

impl MatchDetector for LineMatchDetector {
    fn detect(&self, grid: &dyn GridView) -> Vec<Pos> {
        let mut matched = BTreeSet::new();
        for row in 0..grid.rows() {
            for col in 0..grid.cols() {
                for dir in Self::DIRECTIONS {
                    let (cells, letter) = Self::run_from(grid, Pos::new(row, col), dir);
                    if letter.is_some() && cells.len() >= self.min_run {
                        matched.extend(cells);
                    }
                }
            }
        }
        matched.into_iter().collect()
    }
}

/// The detector pair a landing runs with
pub struct Detectors {
    pub chain: Box<dyn ChainDetector>,
    pub matcher: Box<dyn MatchDetector>,
}

impl Detectors {
    pub fn new(chain: Box<dyn ChainDetector>, matcher: Box<dyn MatchDetector>) -> Self {
        Self { chain, matcher }
    }
}

impl Default for Detectors {
    fn default() -> Self {
        Self::new(
            Box::new(WordChainDetector),
            Box::new(LineMatchDetector::default()),
        )
    }
}

impl std::fmt::Debug for Detectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detectors").finish_non_exhaustive()
    }
}
