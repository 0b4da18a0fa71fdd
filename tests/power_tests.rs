//! Power tests - earning items, the power bar and ability effects across boards

use blockfall::core::{
    Board, BoardConfig, Detectors, EffectContext, EffectKey, PieceGenerator, PowerBar,
    PowerEffectRegistry, SimpleRng,
};
use blockfall::types::{
    Block, Letter, PieceKind, PowerBarItem, PowerKind, PowerLevel, SeatNumber, SpecialDiamond,
    BOARD_ROWS, POWER_BAR_CAPACITY,
};

const LAST: usize = BOARD_ROWS - 1;

fn seat(n: u8) -> SeatNumber {
    SeatNumber::new(n).unwrap()
}

struct SeatState {
    board: Board,
    bar: PowerBar,
    pieces: PieceGenerator,
    rng: SimpleRng,
}

impl SeatState {
    fn new(board: Board, seed: u32) -> Self {
        Self {
            board,
            bar: PowerBar::new(),
            pieces: PieceGenerator::new(seed),
            rng: SimpleRng::new(seed),
        }
    }

    fn receive(&mut self, from: SeatNumber, to: SeatNumber, item: &PowerBarItem) {
        let level = match item {
            PowerBarItem::Block { power, .. } => power.level,
            PowerBarItem::Diamond { .. } => PowerLevel::Normal,
        };
        let mut ctx = EffectContext {
            source: from,
            target: to,
            level,
            board: &mut self.board,
            power_bar: &mut self.bar,
            pieces: &mut self.pieces,
            rng: &mut self.rng,
        };
        PowerEffectRegistry::default()
            .apply(EffectKey::for_item(item), &mut ctx)
            .expect("every item has an effect");
    }
}

#[test]
fn test_removed_power_block_lands_in_bar() {
    let mut board = Board::from_rows(BoardConfig::default(), &["UUU..."]);
    board.set(LAST, 1, Block::powered(Letter::U, PowerKind::Attack, PowerLevel::Mega));

    let outcome = board.process_landed_piece(None, &Detectors::default(), |_, _| {});
    assert_eq!(outcome.earned_own.len(), 1);
    match outcome.earned_own[0] {
        PowerBarItem::Block { letter, power } => {
            assert_eq!(letter, Letter::U);
            assert_eq!(power.kind, PowerKind::Attack);
            assert_eq!(power.level, PowerLevel::Mega);
        }
        other => panic!("unexpected item {:?}", other),
    }
}

#[test]
fn test_thresholds_unlock_each_diamond_once() {
    let config = BoardConfig {
        diamond_thresholds: [3, 6, 100],
        ..BoardConfig::default()
    };
    let mut board = Board::from_rows(config, &["OOO..."]);
    let detectors = Detectors::default();

    let first = board.process_landed_piece(None, &detectors, |_, _| {});
    assert_eq!(
        first.earned_own,
        vec![PowerBarItem::Diamond {
            diamond: SpecialDiamond::SpeedDrop
        }]
    );

    for col in 0..3 {
        board.set(LAST, col, Block::plain(Letter::I));
    }
    let second = board.process_landed_piece(None, &detectors, |_, _| {});
    assert_eq!(
        second.earned_own,
        vec![PowerBarItem::Diamond {
            diamond: SpecialDiamond::RemovePowers
        }]
    );
    assert_eq!(board.unlocked(), [true, true, false]);
}

#[test]
fn test_remove_powers_strips_opponent() {
    let mut opponent = SeatState::new(Board::from_rows(BoardConfig::default(), &["YOU...", "PI!..."]), 9);
    opponent
        .board
        .set(LAST, 0, Block::powered(Letter::P, PowerKind::Defense, PowerLevel::Normal));
    opponent
        .board
        .set(LAST - 1, 2, Block::powered(Letter::U, PowerKind::Attack, PowerLevel::Minor));
    opponent.bar.add_item(PowerBarItem::Diamond {
        diamond: SpecialDiamond::RemoveStones,
    });

    opponent.receive(
        seat(1),
        seat(3),
        &PowerBarItem::Diamond {
            diamond: SpecialDiamond::RemovePowers,
        },
    );

    assert!(opponent.board.cells().iter().all(|b| b.power().is_none()));
    assert!(opponent.bar.is_empty());
    // letters survive
    assert_eq!(opponent.board.to_rows()[LAST], "PI!...");
}

#[test]
fn test_attack_and_defense_pair_cancel_out() {
    let mut target = SeatState::new(Board::from_rows(BoardConfig::default(), &["Y....."]), 4);
    let attack = PowerBarItem::Block {
        letter: Letter::Y,
        power: blockfall::types::Power {
            kind: PowerKind::Attack,
            level: PowerLevel::Minor,
        },
    };
    let defense = PowerBarItem::Block {
        letter: Letter::Y,
        power: blockfall::types::Power {
            kind: PowerKind::Defense,
            level: PowerLevel::Minor,
        },
    };

    target.receive(seat(3), seat(1), &attack);
    assert_eq!(target.board.to_rows()[LAST - 1], "Y.....");
    target.receive(seat(2), seat(1), &defense);
    assert_eq!(target.board.to_rows()[LAST], "Y.....");
}

#[test]
fn test_medusa_goes_to_front_of_target_queue() {
    let mut target = SeatState::new(Board::new(), 21);
    let len = target.pieces.len();
    let item = PowerBarItem::Block {
        letter: Letter::I,
        power: blockfall::types::Power {
            kind: PowerKind::Attack,
            level: PowerLevel::Normal,
        },
    };

    target.receive(seat(5), seat(1), &item);
    assert_eq!(target.pieces.len(), len);
    assert_eq!(target.pieces.get_next_piece().kind, PieceKind::Medusa);
}

#[test]
fn test_bar_evicts_oldest_when_full() {
    let mut bar = PowerBar::new();
    let diamond = |d| PowerBarItem::Diamond { diamond: d };
    bar.add_item(diamond(SpecialDiamond::RemoveStones));
    for _ in 1..POWER_BAR_CAPACITY {
        assert_eq!(bar.add_item(diamond(SpecialDiamond::SpeedDrop)), None);
    }
    let evicted = bar.add_item(diamond(SpecialDiamond::RemovePowers));
    assert_eq!(evicted, Some(diamond(SpecialDiamond::RemoveStones)));
    assert_eq!(bar.len(), POWER_BAR_CAPACITY);
}

#[test]
fn test_generator_is_deterministic_per_seed() {
    let mut a = PieceGenerator::new(77);
    let mut b = PieceGenerator::new(77);
    for _ in 0..20 {
        assert_eq!(a.get_next_piece(), b.get_next_piece());
    }
}
