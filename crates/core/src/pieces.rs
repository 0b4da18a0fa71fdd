//! Falling piece definition
//!
//! A piece is 3 blocks stacked vertically. `row`/`col` locate the top block;
//! the others follow directly below it.

use serde::{Deserialize, Serialize};

use crate::types::{Block, PieceKind, PIECE_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: PieceKind,
    /// Blocks from top to bottom
    pub blocks: [Block; PIECE_LEN],
    pub row: i32,
    pub col: i32,
    /// How many times the colors have been cycled (mod `PIECE_LEN`)
    pub cycle: u8,
}

impl Piece {
    pub fn regular(blocks: [Block; PIECE_LEN], row: i32, col: i32) -> Self {
        Self {
            kind: PieceKind::Regular,
            blocks,
            row,
            col,
            cycle: 0,
        }
    }

    /// Special piece that petrifies its neighbours on landing
    pub fn medusa(row: i32, col: i32) -> Self {
        Self {
            kind: PieceKind::Medusa,
            blocks: [Block::Stone; PIECE_LEN],
            row,
            col,
            cycle: 0,
        }
    }

    /// Special piece that gilds its neighbours on landing
    pub fn midas(row: i32, col: i32) -> Self {
        Self {
            kind: PieceKind::Midas,
            blocks: [Block::Golden; PIECE_LEN],
            row,
            col,
            cycle: 0,
        }
    }

    pub fn is_special(&self) -> bool {
        self.kind != PieceKind::Regular
    }

    /// Absolute (row, col, block) of each cell, top to bottom
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32, Block)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(move |(i, b)| (self.row + i as i32, self.col, *b))
    }

    /// Copy of the piece offset by (d_row, d_col)
    pub fn moved(&self, d_row: i32, d_col: i32) -> Self {
        Self {
            row: self.row + d_row,
            col: self.col + d_col,
            ..*self
        }
    }

    /// Rotate the block order: the bottom block moves to the top
    pub fn cycle_colors(&mut self) {
        self.blocks.rotate_right(1);
        self.cycle = (self.cycle + 1) % PIECE_LEN as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Letter;

    #[test]
    fn test_cells_are_stacked_vertically() {
        let p = Piece::regular(
            [
                Block::plain(Letter::Y),
                Block::plain(Letter::O),
                Block::plain(Letter::U),
            ],
            2,
            3,
        );
        let cells: Vec<_> = p.cells().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(cells, vec![(2, 3), (3, 3), (4, 3)]);
    }

    #[test]
    fn test_cycle_colors_wraps() {
        let mut p = Piece::regular(
            [
                Block::plain(Letter::Y),
                Block::plain(Letter::O),
                Block::plain(Letter::U),
            ],
            0,
            0,
        );
        p.cycle_colors();
        assert_eq!(p.blocks[0], Block::plain(Letter::U));
        assert_eq!(p.blocks[1], Block::plain(Letter::Y));
        p.cycle_colors();
        p.cycle_colors();
        assert_eq!(p.cycle, 0);
        assert_eq!(p.blocks[0], Block::plain(Letter::Y));
    }
}
