use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::pieces::Piece;
use crate::power_bar::PowerBar;
use crate::rng::PieceGenerator;
use crate::types::{Block, Pos, PowerBarItem, SeatNumber, TickSpeed};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub rows: usize,
    pub cols: usize,
    pub hidden_rows: usize,
    /// Row-major cells
    pub cells: Vec<Block>,
    pub pending: Vec<Pos>,
    pub removed: u32,
    pub unlocked: [bool; 3],
    pub forward_remaining: u32,
    pub game_over: bool,
}

impl From<&Board> for BoardSnapshot {
    fn from(board: &Board) -> Self {
        let mut pending = Vec::new();
        for row in 0..board.rows() {
            for col in 0..board.cols() {
                if board.is_pending(row, col) {
                    pending.push(Pos::new(row, col));
                }
            }
        }
        Self {
            rows: board.rows(),
            cols: board.cols(),
            hidden_rows: board.hidden_rows(),
            cells: board.cells().to_vec(),
            pending,
            removed: board.removed_count(),
            unlocked: board.unlocked(),
            forward_remaining: board.forward_remaining(),
            game_over: board.is_game_over(),
        }
    }
}

/// Everything a client needs to draw one seat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub seat: SeatNumber,
    pub board: BoardSnapshot,
    pub piece: Option<Piece>,
    pub next: Vec<Piece>,
    pub power_bar: Vec<PowerBarItem>,
    pub speed: TickSpeed,
    pub speed_drop_remaining: u32,
    pub locked: bool,
    pub playing: bool,
}

impl SeatSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn capture(
        seat: SeatNumber,
        board: &Board,
        piece: Option<&Piece>,
        pieces: &PieceGenerator,
        power_bar: &PowerBar,
        speed: TickSpeed,
        speed_drop_remaining: u32,
        locked: bool,
        playing: bool,
    ) -> Self {
        Self {
            seat,
            board: BoardSnapshot::from(board),
            piece: piece.copied(),
            next: pieces.peek().copied().collect(),
            power_bar: power_bar.items().copied().collect(),
            speed,
            speed_drop_remaining,
            locked,
            playing,
        }
    }

    pub fn playable(&self) -> bool {
        self.playing && !self.board.game_over
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardConfig;

    #[test]
    fn test_snapshot_lists_pending_cells() {
        let mut board = Board::from_rows(BoardConfig::default(), &["YY...."]);
        board.mark_pending(18, 1);
        let snap = BoardSnapshot::from(&board);
        assert_eq!(snap.pending, vec![Pos::new(18, 1)]);
        assert_eq!(snap.cells.len(), 19 * 6);
    }
}
