//! Ability effects
//!
//! [`PowerEffectRegistry`] maps an [`EffectKey`] (letter + attack/defense, or a
//! special diamond) to a plain function over an [`EffectContext`]. Effects run
//! on the target seat's state: its board, power bar and piece queue.
//!
//! | Key | Effect |
//! |-----|--------|
//! | Y attack | push a solid row from the bottom |
//! | Y defense | pop the bottom row |
//! | O attack | dither: swaps that split same-letter neighbours |
//! | O defense | clump: swaps that pull same letters together |
//! | U attack | drop stones on top of random columns |
//! | U defense | sink stones below the non-stone cells of their column |
//! | P attack | turn P power blocks into stone |
//! | P defense | fill a 3x3 P neighbourhood around each P power block |
//! | I attack | medusa piece at the front of the queue |
//! | I defense | midas piece at the front of the queue |
//! | ! attack | bar items become blocks at the bottom of columns |
//! | ! defense | remove every block of the least common letter |
//! | speed drop | next pieces fall faster |
//! | remove powers | strip every power and empty the bar |
//! | remove stones | clear every stone |
//!
//! "By level" amounts use [`PowerLevel::magnitude`] (1/2/3).

use std::collections::HashMap;

use crate::board::Board;
use crate::power_bar::PowerBar;
use crate::rng::{PieceGenerator, SimpleRng};
use crate::types::{
    Block, Letter, Pos, PowerBarItem, PowerKind, PowerLevel, SeatNumber, SpecialDiamond,
    SPEED_DROP_PIECES,
};

/// Swaps performed per magnitude step by the dither/clump effects
pub const SWAPS_PER_LEVEL: usize = 4;

/// Attempt budget multiplier for randomized effects
const ATTEMPTS_PER_ACTION: usize = 12;

/// Registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKey {
    Letter(Letter, PowerKind),
    Diamond(SpecialDiamond),
}

impl EffectKey {
    pub fn for_item(item: &PowerBarItem) -> Self {
        match item {
            PowerBarItem::Block { letter, power } => EffectKey::Letter(*letter, power.kind),
            PowerBarItem::Diamond { diamond } => EffectKey::Diamond(*diamond),
        }
    }
}

/// Target-side state an effect may mutate
pub struct EffectContext<'a> {
    pub source: SeatNumber,
    pub target: SeatNumber,
    pub level: PowerLevel,
    pub board: &'a mut Board,
    pub power_bar: &'a mut PowerBar,
    pub pieces: &'a mut PieceGenerator,
    pub rng: &'a mut SimpleRng,
}

impl EffectContext<'_> {
    fn magnitude(&self) -> usize {
        self.level.magnitude()
    }
}

/// What an effect changed beyond the grid itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectOutcome {
    /// Upcoming pieces forced into speed drop
    pub speed_drop_pieces: u32,
    /// Cells written, swapped or removed
    pub blocks_changed: usize,
}

impl EffectOutcome {
    fn changed(blocks_changed: usize) -> Self {
        Self {
            speed_drop_pieces: 0,
            blocks_changed,
        }
    }
}

pub type EffectFn = fn(&mut EffectContext<'_>) -> EffectOutcome;

/// Catalog of effects
#[derive(Clone)]
pub struct PowerEffectRegistry {
    effects: HashMap<EffectKey, EffectFn>,
}

impl PowerEffectRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            effects: HashMap::new(),
        }
    }

    /// Register or replace an effect
    pub fn register(&mut self, key: EffectKey, effect: EffectFn) {
        self.effects.insert(key, effect);
    }

    pub fn get(&self, key: EffectKey) -> Option<EffectFn> {
        self.effects.get(&key).copied()
    }

    /// Run the effect for `key`, None if nothing is registered
    pub fn apply(&self, key: EffectKey, ctx: &mut EffectContext<'_>) -> Option<EffectOutcome> {
        self.get(key).map(|effect| effect(ctx))
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

impl Default for PowerEffectRegistry {
    fn default() -> Self {
        use PowerKind::{Attack, Defense};

        let mut registry = Self::new();
        registry.register(EffectKey::Letter(Letter::Y, Attack), push_solid_row);
        registry.register(EffectKey::Letter(Letter::Y, Defense), pop_bottom_row);
        registry.register(EffectKey::Letter(Letter::O, Attack), dither);
        registry.register(EffectKey::Letter(Letter::O, Defense), clump);
        registry.register(EffectKey::Letter(Letter::U, Attack), drop_stones);
        registry.register(EffectKey::Letter(Letter::U, Defense), sink_stones);
        registry.register(EffectKey::Letter(Letter::P, Attack), defuse);
        registry.register(EffectKey::Letter(Letter::P, Defense), color_blast);
        registry.register(EffectKey::Letter(Letter::I, Attack), inject_medusa);
        registry.register(EffectKey::Letter(Letter::I, Defense), inject_midas);
        registry.register(EffectKey::Letter(Letter::Bang, Attack), bar_to_bottom);
        registry.register(EffectKey::Letter(Letter::Bang, Defense), color_plague);
        registry.register(EffectKey::Diamond(SpecialDiamond::SpeedDrop), speed_drop);
        registry.register(
            EffectKey::Diamond(SpecialDiamond::RemovePowers),
            remove_powers,
        );
        registry.register(
            EffectKey::Diamond(SpecialDiamond::RemoveStones),
            remove_stones,
        );
        registry
    }
}

impl std::fmt::Debug for PowerEffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerEffectRegistry")
            .field("effects", &self.effects.len())
            .finish()
    }
}

fn letter_at(board: &Board, row: isize, col: isize) -> Option<Letter> {
    if row < 0 || col < 0 {
        return None;
    }
    board.block(row as usize, col as usize).letter()
}

/// True if the block at `pos` is part of a same-letter run of 3 in any direction
fn forms_run(board: &Board, pos: Pos) -> bool {
    let Some(letter) = board.block(pos.row, pos.col).letter() else {
        return false;
    };
    for (dr, dc) in [(0isize, 1isize), (1, 0), (1, 1), (1, -1)] {
        let mut count = 1;
        for sign in [1isize, -1] {
            let mut r = pos.row as isize + dr * sign;
            let mut c = pos.col as isize + dc * sign;
            while letter_at(board, r, c) == Some(letter) {
                count += 1;
                r += dr * sign;
                c += dc * sign;
            }
        }
        if count >= 3 {
            return true;
        }
    }
    false
}

/// Orthogonal neighbours sharing the letter at `pos`
fn same_neighbors(board: &Board, pos: Pos) -> usize {
    let Some(letter) = board.block(pos.row, pos.col).letter() else {
        return 0;
    };
    board
        .neighbors4(pos)
        .into_iter()
        .filter(|n| board.block(n.row, n.col).letter() == Some(letter))
        .count()
}

/// Visible row a new block would occupy on top of `col`
fn landing_row(board: &Board, col: usize) -> Option<usize> {
    let row = match board.column_top(col) {
        Some(0) => return None,
        Some(top) => top - 1,
        None => board.rows() - 1,
    };
    (row >= board.hidden_rows()).then_some(row)
}

fn swappable(board: &Board) -> Vec<Pos> {
    board.positions_where(|b| !b.is_stone())
}

fn push_solid_row(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let cols = ctx.board.cols();
    let mut row: Vec<Block> = Vec::with_capacity(cols);
    for col in 0..cols {
        let mut letter = ctx.rng.letter();
        if col >= 2 && row[col - 1].letter() == Some(letter) && row[col - 2].letter() == Some(letter)
        {
            let others: Vec<Letter> = Letter::ALL.into_iter().filter(|l| *l != letter).collect();
            if let Some(other) = ctx.rng.choose(&others) {
                letter = *other;
            }
        }
        row.push(Block::plain(letter));
    }
    ctx.board.push_row_from_bottom(&row);
    EffectOutcome::changed(cols)
}

fn pop_bottom_row(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let bottom = ctx.board.rows() - 1;
    let cleared = (0..ctx.board.cols())
        .filter(|&col| ctx.board.is_occupied(bottom, col))
        .count();
    ctx.board.pop_bottom_row();
    EffectOutcome::changed(cleared)
}

fn dither(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let wanted = ctx.magnitude() * SWAPS_PER_LEVEL;
    let mut done = 0;

    for _ in 0..wanted * ATTEMPTS_PER_ACTION {
        if done == wanted {
            break;
        }
        let candidates = swappable(ctx.board);
        let (Some(&a), Some(&b)) = (ctx.rng.choose(&candidates), ctx.rng.choose(&candidates))
        else {
            break;
        };
        if a == b || ctx.board.block(a.row, a.col) == ctx.board.block(b.row, b.col) {
            continue;
        }
        ctx.board.swap(a, b);
        let unsafe_swap = forms_run(ctx.board, a)
            || forms_run(ctx.board, b)
            || same_neighbors(ctx.board, a) > 0
            || same_neighbors(ctx.board, b) > 0;
        if unsafe_swap {
            ctx.board.swap(a, b);
        } else {
            done += 1;
        }
    }

    EffectOutcome::changed(done * 2)
}

fn clump(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let wanted = ctx.magnitude() * SWAPS_PER_LEVEL;
    let mut done = 0;

    for _ in 0..wanted * ATTEMPTS_PER_ACTION {
        if done == wanted {
            break;
        }
        let candidates = swappable(ctx.board);
        let (Some(&a), Some(&b)) = (ctx.rng.choose(&candidates), ctx.rng.choose(&candidates))
        else {
            break;
        };
        if a == b || ctx.board.block(a.row, a.col) == ctx.board.block(b.row, b.col) {
            continue;
        }
        let before = same_neighbors(ctx.board, a) + same_neighbors(ctx.board, b);
        ctx.board.swap(a, b);
        let after = same_neighbors(ctx.board, a) + same_neighbors(ctx.board, b);
        if forms_run(ctx.board, a) || forms_run(ctx.board, b) || after <= before {
            ctx.board.swap(a, b);
        } else {
            done += 1;
        }
    }

    EffectOutcome::changed(done * 2)
}

fn drop_stones(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let mut placed = 0;
    for _ in 0..ctx.magnitude() {
        let open: Vec<(usize, usize)> = (0..ctx.board.cols())
            .filter_map(|col| landing_row(ctx.board, col).map(|row| (row, col)))
            .collect();
        let Some(&(row, col)) = ctx.rng.choose(&open) else {
            break;
        };
        ctx.board.set(row, col, Block::Stone);
        placed += 1;
    }
    EffectOutcome::changed(placed)
}

fn sink_stones(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let mut moved = 0;
    for _ in 0..ctx.magnitude() {
        // stones that still have a non-stone cell below them
        let movable: Vec<(Pos, usize)> = ctx
            .board
            .positions_where(|b| b.is_stone())
            .into_iter()
            .filter_map(|pos| {
                (pos.row + 1..ctx.board.rows())
                    .rev()
                    .find(|&r| !ctx.board.block(r, pos.col).is_stone())
                    .map(|target| (pos, target))
            })
            .collect();
        let Some(&(pos, target)) = ctx.rng.choose(&movable) else {
            break;
        };
        for row in pos.row..target {
            let below = ctx.board.block(row + 1, pos.col);
            ctx.board.set(row, pos.col, below);
        }
        ctx.board.set(target, pos.col, Block::Stone);
        moved += 1;
    }
    if moved > 0 {
        ctx.board.shift_down_blocks();
    }
    EffectOutcome::changed(moved)
}

fn is_p_power(block: &Block) -> bool {
    block.letter() == Some(Letter::P) && block.power().is_some()
}

fn defuse(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let mut targets = ctx.board.positions_where(is_p_power);
    ctx.rng.shuffle(&mut targets);
    let n = ctx.magnitude().min(targets.len());
    for pos in &targets[..n] {
        ctx.board.set(pos.row, pos.col, Block::Stone);
    }
    EffectOutcome::changed(n)
}

fn color_blast(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let centers = ctx.board.positions_where(is_p_power);
    let hidden = ctx.board.hidden_rows();
    let mut changed = 0;

    for center in &centers {
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let row = center.row as isize + dr;
                let col = center.col as isize + dc;
                if row < hidden as isize || col < 0 {
                    continue;
                }
                let (row, col) = (row as usize, col as usize);
                match ctx.board.get(row, col) {
                    Some(b) if is_p_power(&b) || b == Block::plain(Letter::P) => {}
                    Some(_) => {
                        ctx.board.set(row, col, Block::plain(Letter::P));
                        changed += 1;
                    }
                    None => {}
                }
            }
        }
    }

    if changed > 0 {
        ctx.board.shift_down_blocks();
    }
    EffectOutcome::changed(changed)
}

fn inject_medusa(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    ctx.pieces.add_medusa_piece();
    EffectOutcome::default()
}

fn inject_midas(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    ctx.pieces.add_midas_piece();
    EffectOutcome::default()
}

fn bar_to_bottom(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let mut placed = 0;
    for _ in 0..ctx.magnitude() {
        let open: Vec<usize> = (0..ctx.board.cols())
            .filter(|&col| landing_row(ctx.board, col).is_some())
            .collect();
        let Some(&col) = ctx.rng.choose(&open) else {
            break;
        };
        let Some(PowerBarItem::Block { letter, .. }) = ctx.power_bar.remove_piece_block_item()
        else {
            break;
        };

        // lift the column by one and slot the block in at the bottom
        let top = ctx.board.column_top(col).unwrap_or(ctx.board.rows());
        for row in top.saturating_sub(1)..ctx.board.rows() - 1 {
            let below = ctx.board.block(row + 1, col);
            ctx.board.set(row, col, below);
        }
        ctx.board.set(ctx.board.rows() - 1, col, Block::plain(letter));
        placed += 1;
    }
    EffectOutcome::changed(placed)
}

fn color_plague(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let mut counts = [0usize; 6];
    for block in ctx.board.cells() {
        if let Some(letter) = block.letter() {
            counts[letter.index()] += 1;
        }
    }
    let Some(rarest) = Letter::ALL
        .into_iter()
        .filter(|l| counts[l.index()] > 0)
        .min_by_key(|l| counts[l.index()])
    else {
        return EffectOutcome::default();
    };

    let victims = ctx.board.positions_where(|b| b.letter() == Some(rarest));
    for pos in &victims {
        ctx.board.set(pos.row, pos.col, Block::Empty);
    }
    ctx.board.shift_down_blocks();
    EffectOutcome::changed(victims.len())
}

fn speed_drop(_ctx: &mut EffectContext<'_>) -> EffectOutcome {
    EffectOutcome {
        speed_drop_pieces: SPEED_DROP_PIECES,
        blocks_changed: 0,
    }
}

fn remove_powers(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let powered = ctx.board.positions_where(|b| b.power().is_some());
    for pos in &powered {
        let plain = ctx.board.block(pos.row, pos.col).without_power();
        ctx.board.set(pos.row, pos.col, plain);
    }
    ctx.power_bar.clear();
    EffectOutcome::changed(powered.len())
}

fn remove_stones(ctx: &mut EffectContext<'_>) -> EffectOutcome {
    let stones = ctx.board.positions_where(|b| b.is_stone());
    for pos in &stones {
        ctx.board.set(pos.row, pos.col, Block::Empty);
    }
    ctx.board.shift_down_blocks();
    EffectOutcome::changed(stones.len())
}
