//! RNG module - seeded randomness and piece generation
//!
//! All randomness in the simulation flows through [`SimpleRng`] so a seat's
//! sequence of pieces and ability outcomes is reproducible from its seed.
//!
//! [`PieceGenerator`] keeps a fixed-length queue of upcoming pieces. Special
//! pieces (medusa/midas) jump to the front without changing the queue length.

use std::collections::VecDeque;

use crate::pieces::Piece;
use crate::types::{
    Block, Letter, PowerKind, PowerLevel, BOARD_COLS, PIECE_LEN, PIECE_QUEUE_LEN,
};

/// Simple LCG (Linear Congruential Generator) RNG
/// Uses constants from Numerical Recipes
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u32,
}

impl SimpleRng {
    /// Create a new RNG with the given seed
    pub fn new(seed: u32) -> Self {
        // Avoid 0 seed which would produce all zeros
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Generate next random u32
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1664525).wrapping_add(1013904223);
        // Low bits of an LCG cycle quickly; use the high half.
        self.state >> 16 | (self.state << 16)
    }

    /// Generate random value in range [0, max)
    pub fn next_range(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        self.next_u32() % max
    }

    /// True with probability `per_mille / 1000`
    pub fn chance(&mut self, per_mille: u32) -> bool {
        self.next_range(1000) < per_mille
    }

    /// Pick a random element
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.next_range(items.len() as u32) as usize)
    }

    /// Shuffle a slice using Fisher-Yates
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.next_range((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    pub fn letter(&mut self) -> Letter {
        Letter::ALL[self.next_range(Letter::ALL.len() as u32) as usize]
    }

    /// Weighted level: minor 50%, normal 35%, mega 15%
    pub fn power_level(&mut self) -> PowerLevel {
        match self.next_range(100) {
            0..=49 => PowerLevel::Minor,
            50..=84 => PowerLevel::Normal,
            _ => PowerLevel::Mega,
        }
    }

    pub fn state(&self) -> u32 {
        self.state
    }
}

/// Generator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Column new pieces spawn in
    pub spawn_col: i32,
    /// Chance (per mille) that a generated block carries a power
    pub power_chance_per_mille: u32,
    pub queue_len: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            spawn_col: (BOARD_COLS / 2) as i32 - 1,
            power_chance_per_mille: 80,
            queue_len: PIECE_QUEUE_LEN,
        }
    }
}

/// Upcoming-piece queue for one seat
#[derive(Debug, Clone)]
pub struct PieceGenerator {
    queue: VecDeque<Piece>,
    rng: SimpleRng,
    config: GeneratorConfig,
}

impl PieceGenerator {
    /// Create a new generator with the given seed
    pub fn new(seed: u32) -> Self {
        Self::with_config(seed, GeneratorConfig::default())
    }

    pub fn with_config(seed: u32, config: GeneratorConfig) -> Self {
        let mut generator = Self {
            queue: VecDeque::with_capacity(config.queue_len.max(1)),
            rng: SimpleRng::new(seed),
            config,
        };
        generator.refill();
        generator
    }

    fn refill(&mut self) {
        while self.queue.len() < self.config.queue_len.max(1) {
            let piece = self.generate();
            self.queue.push_back(piece);
        }
    }

    fn generate(&mut self) -> Piece {
        let mut blocks = [Block::Empty; PIECE_LEN];
        for block in blocks.iter_mut() {
            let letter = self.rng.letter();
            *block = if self.rng.chance(self.config.power_chance_per_mille) {
                let kind = if self.rng.next_range(2) == 0 {
                    PowerKind::Attack
                } else {
                    PowerKind::Defense
                };
                Block::powered(letter, kind, self.rng.power_level())
            } else {
                Block::plain(letter)
            };
        }
        Piece::regular(blocks, 0, self.config.spawn_col)
    }

    /// Dequeue the next piece and refill the queue
    pub fn get_next_piece(&mut self) -> Piece {
        let piece = match self.queue.pop_front() {
            Some(p) => p,
            None => self.generate(),
        };
        self.refill();
        piece
    }

    /// Upcoming pieces, next first
    pub fn peek(&self) -> impl Iterator<Item = &Piece> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Put a medusa piece at the front of the queue
    pub fn add_medusa_piece(&mut self) {
        let piece = Piece::medusa(0, self.config.spawn_col);
        self.push_front_keep_len(piece);
    }

    /// Put a midas piece at the front of the queue
    pub fn add_midas_piece(&mut self) {
        let piece = Piece::midas(0, self.config.spawn_col);
        self.push_front_keep_len(piece);
    }

    // The most recently generated piece makes room.
    fn push_front_keep_len(&mut self, piece: Piece) {
        let len = self.queue.len();
        self.queue.push_front(piece);
        self.queue.truncate(len.max(1));
    }

    pub fn spawn_col(&self) -> i32 {
        self.config.spawn_col
    }
}

impl Default for PieceGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PieceKind;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = SimpleRng::new(12345);
        let mut rng2 = SimpleRng::new(12345);

        // Same seed should produce same sequence
        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = SimpleRng::new(12345);
        let mut rng2 = SimpleRng::new(54321);
        assert_ne!(rng1.next_u32(), rng2.next_u32());
    }

    #[test]
    fn test_generator_same_seed_same_pieces() {
        let mut a = PieceGenerator::new(7);
        let mut b = PieceGenerator::new(7);
        for _ in 0..20 {
            assert_eq!(a.get_next_piece(), b.get_next_piece());
        }
    }

    #[test]
    fn test_generator_keeps_queue_length() {
        let mut generator = PieceGenerator::new(1);
        assert_eq!(generator.len(), PIECE_QUEUE_LEN);
        generator.get_next_piece();
        assert_eq!(generator.len(), PIECE_QUEUE_LEN);
    }

    #[test]
    fn test_special_piece_goes_to_front_without_growing() {
        let mut generator = PieceGenerator::new(1);
        let first = *generator.peek().next().unwrap();
        generator.add_medusa_piece();
        assert_eq!(generator.len(), PIECE_QUEUE_LEN);
        assert_eq!(generator.peek().next().unwrap().kind, PieceKind::Medusa);
        assert_eq!(*generator.peek().nth(1).unwrap(), first);

        generator.add_midas_piece();
        assert_eq!(generator.get_next_piece().kind, PieceKind::Midas);
        assert_eq!(generator.get_next_piece().kind, PieceKind::Medusa);
    }

    #[test]
    fn test_power_chance_zero_yields_plain_blocks() {
        let config = GeneratorConfig {
            power_chance_per_mille: 0,
            ..GeneratorConfig::default()
        };
        let mut generator = PieceGenerator::with_config(3, config);
        for _ in 0..50 {
            let piece = generator.get_next_piece();
            assert!(piece.blocks.iter().all(|b| b.power().is_none()));
        }
    }
}
