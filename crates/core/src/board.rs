//! Board module - manages one seat's grid
//!
//! The board is a fixed-size grid (default 6 columns x 19 rows) where each cell
//! holds a [`Block`]. The top `hidden_rows` rows are never shown to players and
//! only exist for game-over detection.
//! Uses a flat row-major vector; the size is fixed at construction.
//! Coordinates: (row, col) with row 0 at the top and col 0 on the left.

use arrayvec::ArrayVec;
use tracing::warn;

use crate::pieces::Piece;
use crate::rng::SimpleRng;
use crate::types::{
    Block, PieceKind, Pos, PowerBarItem, SeatNumber, Side, SpecialDiamond, BOARD_COLS,
    BOARD_HIDDEN_ROWS, BOARD_ROWS, DIAMOND_THRESHOLDS, HOO_PLACE_ATTEMPTS,
};

/// Geometry and unlock thresholds of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardConfig {
    pub rows: usize,
    pub cols: usize,
    pub hidden_rows: usize,
    pub diamond_thresholds: [u32; 3],
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            rows: BOARD_ROWS,
            cols: BOARD_COLS,
            hidden_rows: BOARD_HIDDEN_ROWS,
            diamond_thresholds: DIAMOND_THRESHOLDS,
        }
    }
}

/// Link to the same-team adjacent board.
///
/// `side` is where the partner sits relative to this board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartnerLink {
    pub seat: SeatNumber,
    pub side: Side,
}

/// Blocks taken off a board by one removal pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovedBlocks {
    pub blocks: Vec<(Pos, Block)>,
    /// Power-bar items earned by this removal (power blocks and unlocked diamonds)
    pub earned: Vec<PowerBarItem>,
}

/// One seat's grid simulation
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    config: BoardConfig,
    /// Flat array of cells, row-major order (row * cols + col)
    cells: Vec<Block>,
    /// Cells marked for removal and waiting on the fade handshake
    pending: Vec<bool>,
    removed: u32,
    unlocked: [bool; 3],
    partner: Option<PartnerLink>,
    forward_remaining: u32,
    game_over: bool,
    detected_chains: Vec<Pos>,
    detected_matches: Vec<Pos>,
}

impl Board {
    /// Create a new empty board with default geometry
    pub fn new() -> Self {
        Self::with_config(BoardConfig::default())
    }

    pub fn with_config(config: BoardConfig) -> Self {
        let size = config.rows * config.cols;
        Self {
            config,
            cells: vec![Block::Empty; size],
            pending: vec![false; size],
            removed: 0,
            unlocked: [false; 3],
            partner: None,
            forward_remaining: 0,
            game_over: false,
            detected_chains: Vec::new(),
            detected_matches: Vec::new(),
        }
    }

    /// Calculate flat index from (row, col)
    #[inline(always)]
    fn index(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.config.rows || col >= self.config.cols {
            return None;
        }
        Some(row * self.config.cols + col)
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn rows(&self) -> usize {
        self.config.rows
    }

    pub fn cols(&self) -> usize {
        self.config.cols
    }

    pub fn hidden_rows(&self) -> usize {
        self.config.hidden_rows
    }

    /// Get block at (row, col). Returns None if out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<Block> {
        self.index(row, col).map(|idx| self.cells[idx])
    }

    /// Block at (row, col), treating out-of-bounds as empty
    pub fn block(&self, row: usize, col: usize) -> Block {
        self.get(row, col).unwrap_or_default()
    }

    /// Set block at (row, col). Returns false if out of bounds
    pub fn set(&mut self, row: usize, col: usize, block: Block) -> bool {
        match self.index(row, col) {
            Some(idx) => {
                self.cells[idx] = block;
                self.pending[idx] = false;
                true
            }
            None => false,
        }
    }

    pub fn is_occupied(&self, row: usize, col: usize) -> bool {
        matches!(self.get(row, col), Some(b) if !b.is_empty())
    }

    pub fn is_pending(&self, row: usize, col: usize) -> bool {
        self.index(row, col).map(|i| self.pending[i]).unwrap_or(false)
    }

    /// Flag a non-empty cell for removal. Returns false if empty, out of
    /// bounds or already pending
    pub fn mark_pending(&mut self, row: usize, col: usize) -> bool {
        match self.index(row, col) {
            Some(idx) if !self.cells[idx].is_empty() && !self.pending[idx] => {
                self.pending[idx] = true;
                true
            }
            _ => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|p| *p)
    }

    /// Row index of the highest occupied cell in a column
    pub fn column_top(&self, col: usize) -> Option<usize> {
        (0..self.config.rows).find(|&row| self.is_occupied(row, col))
    }

    /// Number of non-empty cells in a column
    pub fn column_count(&self, col: usize) -> usize {
        (0..self.config.rows)
            .filter(|&row| self.is_occupied(row, col))
            .count()
    }

    /// Orthogonal in-bounds neighbours of a cell
    pub fn neighbors4(&self, pos: Pos) -> ArrayVec<Pos, 4> {
        let mut out = ArrayVec::new();
        if pos.row > 0 {
            out.push(Pos::new(pos.row - 1, pos.col));
        }
        if pos.row + 1 < self.config.rows {
            out.push(Pos::new(pos.row + 1, pos.col));
        }
        if pos.col > 0 {
            out.push(Pos::new(pos.row, pos.col - 1));
        }
        if pos.col + 1 < self.config.cols {
            out.push(Pos::new(pos.row, pos.col + 1));
        }
        out
    }

    /// Positions of every non-empty cell satisfying `pred`
    pub fn positions_where(&self, mut pred: impl FnMut(&Block) -> bool) -> Vec<Pos> {
        let cols = self.config.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty() && pred(b))
            .map(|(i, _)| Pos::new(i / cols, i % cols))
            .collect()
    }

    pub fn removed_count(&self) -> u32 {
        self.removed
    }

    pub fn unlocked(&self) -> [bool; 3] {
        self.unlocked
    }

    pub fn partner(&self) -> Option<PartnerLink> {
        self.partner
    }

    /// Link this board to a partner. Callers link both sides together so the
    /// relationship stays symmetric.
    pub fn set_partner(&mut self, link: Option<PartnerLink>) {
        self.partner = link;
    }

    pub fn forward_remaining(&self) -> u32 {
        self.forward_remaining
    }

    /// Overwrite the forward counter
    pub fn set_forward_remaining(&mut self, value: u32) {
        self.forward_remaining = value;
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Latch game over for reasons outside the hidden-row rule (blocked spawn)
    pub fn set_game_over(&mut self) {
        self.game_over = true;
    }

    pub fn detected_chains(&self) -> &[Pos] {
        &self.detected_chains
    }

    pub fn detected_matches(&self) -> &[Pos] {
        &self.detected_matches
    }

    pub(crate) fn record_detection(&mut self, chains: Vec<Pos>, matches: Vec<Pos>) {
        self.detected_chains = chains;
        self.detected_matches = matches;
    }

    pub(crate) fn clear_detection(&mut self) {
        self.detected_chains.clear();
        self.detected_matches.clear();
    }

    /// True if any block of the piece would leave the grid or overlap a non-empty cell
    pub fn has_collision(&self, piece: &Piece) -> bool {
        piece.cells().any(|(row, col, _)| {
            if row < 0 || col < 0 {
                return true;
            }
            match self.get(row as usize, col as usize) {
                Some(block) => !block.is_empty(),
                None => true,
            }
        })
    }

    /// Commit all blocks of a non-colliding piece into the grid.
    /// Returns false (and leaves the grid untouched) if the piece collides.
    pub fn place_piece(&mut self, piece: &Piece) -> bool {
        if self.has_collision(piece) {
            return false;
        }
        for (row, col, block) in piece.cells() {
            self.set(row as usize, col as usize, block);
        }
        true
    }

    /// Resolve a landed medusa/midas piece: regular blocks orthogonally adjacent
    /// to any of its cells become stone (medusa) or golden (midas), then the
    /// piece's own cells are cleared and the column is compacted.
    ///
    /// Returns the number of converted blocks. Regular pieces are ignored.
    pub fn convert_surrounding_blocks_to_power_blocks(&mut self, piece: &Piece) -> usize {
        let replacement = match piece.kind {
            PieceKind::Medusa => Block::Stone,
            PieceKind::Midas => Block::Golden,
            PieceKind::Regular => return 0,
        };

        let own: Vec<Pos> = piece
            .cells()
            .filter(|(r, c, _)| *r >= 0 && *c >= 0)
            .map(|(r, c, _)| Pos::new(r as usize, c as usize))
            .collect();

        let mut converted = 0;
        for &pos in &own {
            for n in self.neighbors4(pos) {
                if own.contains(&n) {
                    continue;
                }
                if self.block(n.row, n.col).is_regular() {
                    self.set(n.row, n.col, replacement);
                    converted += 1;
                }
            }
        }

        for pos in own {
            self.set(pos.row, pos.col, Block::Empty);
        }
        self.shift_down_blocks();
        converted
    }

    /// Clear every pending cell, updating the removed-block counter and
    /// collecting earned power-bar items.
    ///
    /// Each threshold in the config unlocks its diamond exactly once.
    pub fn remove_pending(&mut self) -> RemovedBlocks {
        let cols = self.config.cols;
        let positions: Vec<Pos> = (0..self.cells.len())
            .filter(|&idx| self.pending[idx])
            .map(|idx| Pos::new(idx / cols, idx % cols))
            .collect();
        self.remove_cells(&positions)
    }

    /// Clear the given cells if they are still pending. Cells marked by
    /// anyone else stay in place.
    pub fn remove_cells(&mut self, positions: &[Pos]) -> RemovedBlocks {
        let cols = self.config.cols;
        let mut out = RemovedBlocks::default();

        for pos in positions {
            let Some(idx) = self.index(pos.row, pos.col) else {
                continue;
            };
            if !self.pending[idx] {
                continue;
            }
            self.pending[idx] = false;
            let block = std::mem::take(&mut self.cells[idx]);
            if block.is_empty() {
                continue;
            }
            self.removed += 1;
            if let Block::Regular {
                letter,
                power: Some(power),
            } = block
            {
                out.earned.push(PowerBarItem::Block { letter, power });
            }
            out.blocks.push((Pos::new(idx / cols, idx % cols), block));
        }

        for (i, threshold) in self.config.diamond_thresholds.iter().enumerate() {
            if !self.unlocked[i] && self.removed >= *threshold {
                self.unlocked[i] = true;
                out.earned.push(PowerBarItem::Diamond {
                    diamond: SpecialDiamond::BY_THRESHOLD[i],
                });
            }
        }

        out
    }

    /// Compact every column downward, preserving relative order and backfilling
    /// empties at the top. Pending flags travel with their blocks.
    ///
    /// Returns false if a column's non-empty count changed, which is logged and
    /// otherwise tolerated.
    pub fn shift_down_blocks(&mut self) -> bool {
        let rows = self.config.rows;
        let mut ok = true;

        for col in 0..self.config.cols {
            let before = self.column_count(col);

            let mut write = rows;
            for read in (0..rows).rev() {
                let Some(src) = self.index(read, col) else {
                    continue;
                };
                if self.cells[src].is_empty() {
                    continue;
                }
                write -= 1;
                if write != read {
                    let dst = write * self.config.cols + col;
                    self.cells[dst] = self.cells[src];
                    self.pending[dst] = self.pending[src];
                    self.cells[src] = Block::Empty;
                    self.pending[src] = false;
                }
            }

            let after = self.column_count(col);
            if before != after {
                warn!(col, before, after, "gravity changed column block count");
                ok = false;
            }
        }

        ok
    }

    /// True if the just-placed piece or any existing block sits in a hidden row.
    /// Latches the board's game-over flag.
    pub fn check_if_game_over(&mut self, last_piece: Option<&Piece>) -> bool {
        let hidden = self.config.hidden_rows as i32;
        let piece_hidden = last_piece
            .map(|p| p.cells().any(|(row, _, _)| row < hidden))
            .unwrap_or(false);
        let grid_hidden = (0..self.config.hidden_rows)
            .any(|row| (0..self.config.cols).any(|col| self.is_occupied(row, col)));

        if piece_hidden || grid_hidden {
            self.game_over = true;
        }
        self.game_over
    }

    /// Scatter forwarded blocks onto random columns, each landing immediately
    /// above the column's highest block. Blocks that find no visible slot after
    /// a few column attempts are dropped.
    ///
    /// Returns the number of blocks placed.
    pub fn place_blocks_from_hoo(&mut self, blocks: &[Block], rng: &mut SimpleRng) -> usize {
        let mut placed = 0;
        for block in blocks.iter().filter(|b| !b.is_empty()) {
            for _ in 0..HOO_PLACE_ATTEMPTS {
                let col = rng.next_range(self.config.cols as u32) as usize;
                let target = match self.column_top(col) {
                    Some(0) => continue,
                    Some(top) => top - 1,
                    None => self.config.rows - 1,
                };
                if target < self.config.hidden_rows {
                    continue;
                }
                self.set(target, col, *block);
                placed += 1;
                break;
            }
        }
        placed
    }

    /// Move every row up by one, dropping the top row, and put `row` at the bottom
    pub fn push_row_from_bottom(&mut self, row: &[Block]) {
        let cols = self.config.cols;
        self.cells.copy_within(cols.., 0);
        self.pending.copy_within(cols.., 0);
        let start = self.cells.len() - cols;
        for col in 0..cols {
            self.cells[start + col] = row.get(col).copied().unwrap_or_default();
            self.pending[start + col] = false;
        }
    }

    /// Remove the bottom row, shifting everything down and adding an empty row at the top
    pub fn pop_bottom_row(&mut self) {
        let cols = self.config.cols;
        let len = self.cells.len();
        self.cells.copy_within(0..len - cols, cols);
        self.pending.copy_within(0..len - cols, cols);
        for col in 0..cols {
            self.cells[col] = Block::Empty;
            self.pending[col] = false;
        }
    }

    /// Swap the contents of two cells
    pub fn swap(&mut self, a: Pos, b: Pos) -> bool {
        match (self.index(a.row, a.col), self.index(b.row, b.col)) {
            (Some(i), Some(j)) => {
                self.cells.swap(i, j);
                self.pending.swap(i, j);
                true
            }
            _ => false,
        }
    }

    /// Get a reference to the internal cells
    pub fn cells(&self) -> &[Block] {
        &self.cells
    }

    /// Clear the grid and all round state, keeping geometry
    pub fn clear(&mut self) {
        let config = self.config;
        *self = Self::with_config(config);
    }

    /// Build a board from text rows for tests and tooling.
    ///
    /// `.` is empty, `#` stone, `*` golden, letters are plain regular blocks.
    /// Rows are aligned to the bottom of the grid.
    pub fn from_rows(config: BoardConfig, rows: &[&str]) -> Self {
        let mut board = Self::with_config(config);
        let offset = config.rows.saturating_sub(rows.len());
        for (r, line) in rows.iter().enumerate() {
            for (c, ch) in line.chars().enumerate() {
                let block = match ch {
                    '.' => Block::Empty,
                    '#' => Block::Stone,
                    '*' => Block::Golden,
                    other => match crate::types::Letter::from_char(other) {
                        Some(letter) => Block::plain(letter),
                        None => Block::Empty,
                    },
                };
                board.set(offset + r, c, block);
            }
        }
        board
    }

    /// Render the grid as text rows (inverse of [`Board::from_rows`], powers dropped)
    pub fn to_rows(&self) -> Vec<String> {
        (0..self.config.rows)
            .map(|row| {
                (0..self.config.cols)
                    .map(|col| match self.block(row, col) {
                        Block::Empty => '.',
                        Block::Stone => '#',
                        Block::Golden => '*',
                        Block::Regular { letter, .. } => letter.as_char(),
                    })
                    .collect::<String>()
            })
            .collect()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Letter, PowerKind, PowerLevel};

    fn small() -> BoardConfig {
        BoardConfig {
            rows: 6,
            cols: 4,
            hidden_rows: 1,
            diamond_thresholds: [2, 4, 6],
        }
    }

    #[test]
    fn test_board_index_calculation() {
        let board = Board::new();
        assert_eq!(board.index(0, 0), Some(0));
        assert_eq!(board.index(0, 5), Some(5));
        assert_eq!(board.index(1, 0), Some(6));
        assert_eq!(board.index(18, 5), Some(18 * 6 + 5));
        assert_eq!(board.index(19, 0), None);
        assert_eq!(board.index(0, 6), None);
    }

    #[test]
    fn test_shift_down_compacts_columns() {
        let mut board = Board::from_rows(small(), &["Y...", "....", "O.#.", "....", "U..."]);
        assert!(board.shift_down_blocks());
        let rows = board.to_rows();
        assert_eq!(rows[3], "Y...");
        assert_eq!(rows[4], "O...");
        assert_eq!(rows[5], "U.#.");
    }

    #[test]
    fn test_shift_down_moves_pending_flags() {
        let mut board = Board::from_rows(small(), &["Y...", "...."]);
        assert!(board.mark_pending(4, 0));
        board.shift_down_blocks();
        assert!(board.is_pending(5, 0));
        assert!(!board.is_pending(4, 0));
    }

    #[test]
    fn test_remove_pending_unlocks_each_threshold_once() {
        let mut board = Board::from_rows(small(), &["YYYY"]);
        board.set(
            5,
            0,
            Block::powered(Letter::Y, PowerKind::Attack, PowerLevel::Mega),
        );
        for col in 0..3 {
            board.mark_pending(5, col);
        }
        let removed = board.remove_pending();
        assert_eq!(removed.blocks.len(), 3);
        assert_eq!(board.removed_count(), 3);
        assert!(removed.earned.contains(&PowerBarItem::Block {
            letter: Letter::Y,
            power: crate::types::Power {
                kind: PowerKind::Attack,
                level: PowerLevel::Mega
            }
        }));
        assert!(removed.earned.contains(&PowerBarItem::Diamond {
            diamond: SpecialDiamond::SpeedDrop
        }));
        assert_eq!(board.unlocked(), [true, false, false]);

        board.mark_pending(5, 3);
        let again = board.remove_pending();
        assert_eq!(board.removed_count(), 4);
        assert_eq!(
            again.earned,
            vec![PowerBarItem::Diamond {
                diamond: SpecialDiamond::RemovePowers
            }]
        );
        assert!(!board.has_pending());
    }

    #[test]
    fn test_push_and_pop_rows() {
        let mut board = Board::from_rows(small(), &["Y..."]);
        board.push_row_from_bottom(&[Block::Stone; 4]);
        assert_eq!(board.to_rows()[4], "Y...");
        assert_eq!(board.to_rows()[5], "####");
        board.pop_bottom_row();
        assert_eq!(board.to_rows()[5], "Y...");
        assert_eq!(board.to_rows()[0], "....");
    }
}
