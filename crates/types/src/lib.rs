//! Core types module - shared data structures and constants
//!
//! This module defines the fundamental types used throughout the server.
//! All types are plain data with serde derives only, making them usable in
//! any context (board simulation, round orchestration, wire protocol).
//!
//! # Board Dimensions
//!
//! - **Columns**: 6 (indexed 0-5, left to right)
//! - **Rows**: 19 (indexed 0-18, top to bottom)
//! - **Hidden rows**: the top 3 rows are only used for game-over detection
//! - **Spawn position**: row 0, column 2 (the piece occupies rows 0..3)
//!
//! # Seats and Teams
//!
//! A table has 8 seats. Seats are partitioned into 4 teams of 2 adjacent
//! seats: (1, 2), (3, 4), (5, 6), (7, 8). The odd seat of a pair sits on the
//! left, the even seat on the right.
//!
//! # Tick Timing
//!
//! | Speed | Interval |
//! |-------|----------|
//! | `Normal` | 450ms |
//! | `Drop` | 45ms |
//! | `SpeedDrop` | 150ms |
//! | `DropSpeedDrop` | 30ms |
//! | `BreakingBlocks` | 300ms |
//!
//! # Examples
//!
//! ```
//! use blockfall_types::{Letter, RoundState, SeatNumber, TeamNumber};
//!
//! assert_eq!(Letter::from_char('!'), Some(Letter::Bang));
//! assert_eq!(SeatNumber::new(4).unwrap().team(), TeamNumber(2));
//! assert!(RoundState::Waiting.can_transition_to(RoundState::Countdown));
//! assert!(!RoundState::Waiting.can_transition_to(RoundState::Playing));
//! ```

use serde::{Deserialize, Serialize};

/// Board width in cells
pub const BOARD_COLS: usize = 6;

/// Rows visible to the player
pub const BOARD_VISIBLE_ROWS: usize = 16;

/// Rows above the visible area, used only for game-over detection
pub const BOARD_HIDDEN_ROWS: usize = 3;

/// Total board height in cells
pub const BOARD_ROWS: usize = BOARD_VISIBLE_ROWS + BOARD_HIDDEN_ROWS;

/// Number of blocks in a falling piece
pub const PIECE_LEN: usize = 3;

/// Number of upcoming pieces kept in a seat's queue
pub const PIECE_QUEUE_LEN: usize = 3;

/// Seats per table
pub const SEAT_COUNT: u8 = 8;

/// Seats per team
pub const SEATS_PER_TEAM: u8 = 2;

/// Seat preference order used by automatic seating
pub const SEAT_PRIORITY: [u8; 8] = [1, 3, 5, 7, 2, 4, 6, 8];

/// Cumulative removed-block counts that unlock the three special diamonds
pub const DIAMOND_THRESHOLDS: [u32; 3] = [50, 100, 150];

/// Maximum items held by a power bar (oldest is evicted past this)
pub const POWER_BAR_CAPACITY: usize = 8;

/// Piece falls forced into speed-drop by one speed-drop diamond
pub const SPEED_DROP_PIECES: u32 = 5;

/// Column attempts when scattering a forwarded block
pub const HOO_PLACE_ATTEMPTS: usize = 3;

/// Rating assigned to players with no stored rating
pub const DEFAULT_RATING: i32 = 1200;

/// Default rating K-factor
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Normal tick interval in milliseconds
pub const NORMAL_TICK_MS: u64 = 450;

/// User-held fast fall tick interval in milliseconds
pub const DROP_TICK_MS: u64 = 45;

/// Ability-forced tick interval in milliseconds
pub const SPEED_DROP_TICK_MS: u64 = 150;

/// Fast fall while a speed drop is active, in milliseconds
pub const DROP_SPEED_DROP_TICK_MS: u64 = 30;

/// Tick interval while a landing is resolving, in milliseconds
pub const BREAKING_BLOCKS_TICK_MS: u64 = 300;

/// Block letters. Each letter carries its own attack/defense ability pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Letter {
    #[serde(rename = "Y")]
    Y,
    #[serde(rename = "O")]
    O,
    #[serde(rename = "U")]
    U,
    #[serde(rename = "P")]
    P,
    #[serde(rename = "I")]
    I,
    #[serde(rename = "!")]
    Bang,
}

impl Letter {
    /// All letters in chain order
    pub const ALL: [Letter; 6] = [
        Letter::Y,
        Letter::O,
        Letter::U,
        Letter::P,
        Letter::I,
        Letter::Bang,
    ];

    /// Parse a letter from its display character
    ///
    /// # Examples
    ///
    /// ```
    /// use blockfall_types::Letter;
    ///
    /// assert_eq!(Letter::from_char('y'), Some(Letter::Y));
    /// assert_eq!(Letter::from_char('x'), None);
    /// ```
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'Y' => Some(Letter::Y),
            'O' => Some(Letter::O),
            'U' => Some(Letter::U),
            'P' => Some(Letter::P),
            'I' => Some(Letter::I),
            '!' => Some(Letter::Bang),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Letter::Y => 'Y',
            Letter::O => 'O',
            Letter::U => 'U',
            Letter::P => 'P',
            Letter::I => 'I',
            Letter::Bang => '!',
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Which half of a letter's ability pair a block carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerKind {
    Attack,
    Defense,
}

/// Ability magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerLevel {
    Minor,
    Normal,
    Mega,
}

impl PowerLevel {
    /// Magnitude used by "by level" effects: minor=1, normal=2, mega=3
    pub fn magnitude(&self) -> usize {
        match self {
            PowerLevel::Minor => 1,
            PowerLevel::Normal => 2,
            PowerLevel::Mega => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Power {
    pub kind: PowerKind,
    pub level: PowerLevel,
}

/// A single grid cell's content.
///
/// Closed set of kinds; identity is tracked only by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Block {
    #[default]
    Empty,
    /// Colored letter block, optionally carrying an ability
    Regular {
        letter: Letter,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        power: Option<Power>,
    },
    /// Inert block, never removed by color matches
    Stone,
    /// Removable wildcard created by a midas piece
    Golden,
}

impl Block {
    pub fn plain(letter: Letter) -> Self {
        Block::Regular {
            letter,
            power: None,
        }
    }

    pub fn powered(letter: Letter, kind: PowerKind, level: PowerLevel) -> Self {
        Block::Regular {
            letter,
            power: Some(Power { kind, level }),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Block::Empty)
    }

    pub fn is_stone(&self) -> bool {
        matches!(self, Block::Stone)
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, Block::Regular { .. })
    }

    pub fn letter(&self) -> Option<Letter> {
        match self {
            Block::Regular { letter, .. } => Some(*letter),
            _ => None,
        }
    }

    pub fn power(&self) -> Option<Power> {
        match self {
            Block::Regular { power, .. } => *power,
            _ => None,
        }
    }

    /// Same block with any ability stripped
    pub fn without_power(&self) -> Self {
        match self {
            Block::Regular { letter, .. } => Block::plain(*letter),
            other => *other,
        }
    }
}

/// Grid coordinate, row 0 at the top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

impl Pos {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Abilities unlocked by cumulative removal thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpecialDiamond {
    SpeedDrop,
    RemovePowers,
    RemoveStones,
}

impl SpecialDiamond {
    /// Diamonds in threshold order (matches [`DIAMOND_THRESHOLDS`])
    pub const BY_THRESHOLD: [SpecialDiamond; 3] = [
        SpecialDiamond::SpeedDrop,
        SpecialDiamond::RemovePowers,
        SpecialDiamond::RemoveStones,
    ];

    /// Whether the diamond is aimed at an opponent
    pub fn targets_opponent(&self) -> bool {
        !matches!(self, SpecialDiamond::RemoveStones)
    }
}

/// One earned ability waiting in a seat's power bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "lowercase")]
pub enum PowerBarItem {
    Block { letter: Letter, power: Power },
    Diamond { diamond: SpecialDiamond },
}

impl PowerBarItem {
    pub fn is_diamond(&self) -> bool {
        matches!(self, PowerBarItem::Diamond { .. })
    }

    /// Whether using this item must target an opponent seat
    pub fn targets_opponent(&self) -> bool {
        match self {
            PowerBarItem::Block { power, .. } => power.kind == PowerKind::Attack,
            PowerBarItem::Diamond { diamond } => diamond.targets_opponent(),
        }
    }
}

/// Falling piece variety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    #[default]
    Regular,
    /// Turns neighbouring regular blocks into stone on landing
    Medusa,
    /// Turns neighbouring regular blocks into golden blocks on landing
    Midas,
}

/// Horizontal side of a partner board relative to its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub u64);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamNumber(pub u8);

/// Seat number in `1..=8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SeatNumber(u8);

impl SeatNumber {
    pub fn new(n: u8) -> Option<Self> {
        (1..=SEAT_COUNT).contains(&n).then_some(Self(n))
    }

    /// All seats in ascending order
    pub fn all() -> impl Iterator<Item = SeatNumber> {
        (1..=SEAT_COUNT).map(SeatNumber)
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based index into a seat array
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn team(&self) -> TeamNumber {
        TeamNumber((self.0 + 1) / SEATS_PER_TEAM)
    }

    /// The adjacent same-team seat
    pub fn partner(&self) -> SeatNumber {
        if self.0 % 2 == 1 {
            SeatNumber(self.0 + 1)
        } else {
            SeatNumber(self.0 - 1)
        }
    }

    /// Side this seat occupies within its team pair
    pub fn side(&self) -> Side {
        if self.0 % 2 == 1 {
            Side::Left
        } else {
            Side::Right
        }
    }
}

impl TryFrom<u8> for SeatNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SeatNumber::new(value).ok_or_else(|| format!("seat out of range: {}", value))
    }
}

impl From<SeatNumber> for u8 {
    fn from(value: SeatNumber) -> Self {
        value.0
    }
}

impl std::fmt::Display for SeatNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tick speed of a seat's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TickSpeed {
    Normal,
    Drop,
    SpeedDrop,
    DropSpeedDrop,
    BreakingBlocks,
}

impl TickSpeed {
    /// Falling speed for the given input/ability combination
    ///
    /// # Examples
    ///
    /// ```
    /// use blockfall_types::TickSpeed;
    ///
    /// assert_eq!(TickSpeed::falling(false, false), TickSpeed::Normal);
    /// assert_eq!(TickSpeed::falling(true, true), TickSpeed::DropSpeedDrop);
    /// ```
    pub fn falling(dropping: bool, speed_drop: bool) -> Self {
        match (dropping, speed_drop) {
            (false, false) => TickSpeed::Normal,
            (true, false) => TickSpeed::Drop,
            (false, true) => TickSpeed::SpeedDrop,
            (true, true) => TickSpeed::DropSpeedDrop,
        }
    }
}

/// Round lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    #[default]
    Waiting,
    Countdown,
    Playing,
    GameOver,
}

impl RoundState {
    /// The only edges are WAITING→COUNTDOWN→PLAYING→GAME_OVER→WAITING,
    /// plus COUNTDOWN→GAME_OVER when readiness drops mid-countdown.
    pub fn can_transition_to(&self, next: RoundState) -> bool {
        matches!(
            (self, next),
            (RoundState::Waiting, RoundState::Countdown)
                | (RoundState::Countdown, RoundState::Playing)
                | (RoundState::Countdown, RoundState::GameOver)
                | (RoundState::Playing, RoundState::GameOver)
                | (RoundState::GameOver, RoundState::Waiting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Waiting => "WAITING",
            RoundState::Countdown => "COUNTDOWN",
            RoundState::Playing => "PLAYING",
            RoundState::GameOver => "GAME_OVER",
        }
    }
}

/// Who may join a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    /// Anyone may watch; sitting needs an invitation
    Protected,
    /// Only invited players may join
    Private,
}

/// Player inputs that mutate the falling piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputAction {
    MoveLeft,
    MoveRight,
    CycleColors,
    StartDrop,
    StopDrop,
}

impl InputAction {
    /// Parse action from its protocol name (case-insensitive)
    ///
    /// # Examples
    ///
    /// ```
    /// use blockfall_types::InputAction;
    ///
    /// assert_eq!(InputAction::from_str("moveLeft"), Some(InputAction::MoveLeft));
    /// assert_eq!(InputAction::from_str("cyclecolors"), Some(InputAction::CycleColors));
    /// assert_eq!(InputAction::from_str("rotate"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "moveleft" => Some(InputAction::MoveLeft),
            "moveright" => Some(InputAction::MoveRight),
            "cyclecolors" => Some(InputAction::CycleColors),
            "startdrop" => Some(InputAction::StartDrop),
            "stopdrop" => Some(InputAction::StopDrop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputAction::MoveLeft => "moveLeft",
            InputAction::MoveRight => "moveRight",
            InputAction::CycleColors => "cycleColors",
            InputAction::StartDrop => "startDrop",
            InputAction::StopDrop => "stopDrop",
        }
    }
}
