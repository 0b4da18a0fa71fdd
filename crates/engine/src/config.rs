//! Engine configuration

use std::time::Duration;

use crate::types::{
    TickSpeed, BREAKING_BLOCKS_TICK_MS, DEFAULT_K_FACTOR, DROP_SPEED_DROP_TICK_MS, DROP_TICK_MS,
    NORMAL_TICK_MS, SPEED_DROP_TICK_MS,
};

/// Tick interval per speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSpeeds {
    pub normal: Duration,
    pub drop: Duration,
    pub speed_drop: Duration,
    pub drop_speed_drop: Duration,
    pub breaking_blocks: Duration,
}

impl TickSpeeds {
    pub fn interval(&self, speed: TickSpeed) -> Duration {
        match speed {
            TickSpeed::Normal => self.normal,
            TickSpeed::Drop => self.drop,
            TickSpeed::SpeedDrop => self.speed_drop,
            TickSpeed::DropSpeedDrop => self.drop_speed_drop,
            TickSpeed::BreakingBlocks => self.breaking_blocks,
        }
    }
}

impl Default for TickSpeeds {
    fn default() -> Self {
        Self {
            normal: Duration::from_millis(NORMAL_TICK_MS),
            drop: Duration::from_millis(DROP_TICK_MS),
            speed_drop: Duration::from_millis(SPEED_DROP_TICK_MS),
            drop_speed_drop: Duration::from_millis(DROP_SPEED_DROP_TICK_MS),
            breaking_blocks: Duration::from_millis(BREAKING_BLOCKS_TICK_MS),
        }
    }
}

/// Round and simulation settings shared by every table
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// Distinct teams with ready players needed to start and keep a round going
    pub min_teams: usize,
    /// Lets a single team start a round (automated testing)
    pub test_mode: bool,
    pub countdown_secs: u32,
    /// Rounds shorter than this are unrated and have no winners
    pub grace_secs: u32,
    pub cooldown_secs: u32,
    /// Upper bound on waiting for a client's fade acknowledgement
    pub fade_timeout: Duration,
    pub k_factor: f64,
    /// Fixed seed for piece generation; random per seat when unset
    pub seed: Option<u32>,
    /// Chance (per mille) that a generated block carries a power
    pub power_chance_per_mille: u32,
    pub ticks: TickSpeeds,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_teams: 2,
            test_mode: false,
            countdown_secs: 15,
            grace_secs: 30,
            cooldown_secs: 5,
            fade_timeout: Duration::from_millis(1000),
            k_factor: DEFAULT_K_FACTOR,
            seed: None,
            power_chance_per_mille: 80,
            ticks: TickSpeeds::default(),
        }
    }
}

impl GameConfig {
    /// Create from `BLOCKFALL_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        use std::env;

        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        let test_mode = env::var("BLOCKFALL_TEST_MODE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            min_teams: parsed("BLOCKFALL_MIN_TEAMS").unwrap_or(defaults.min_teams),
            test_mode,
            countdown_secs: parsed("BLOCKFALL_COUNTDOWN_SECS").unwrap_or(defaults.countdown_secs),
            grace_secs: parsed("BLOCKFALL_GRACE_SECS").unwrap_or(defaults.grace_secs),
            cooldown_secs: parsed("BLOCKFALL_COOLDOWN_SECS").unwrap_or(defaults.cooldown_secs),
            fade_timeout: parsed("BLOCKFALL_FADE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fade_timeout),
            k_factor: parsed("BLOCKFALL_K_FACTOR").unwrap_or(defaults.k_factor),
            seed: parsed("BLOCKFALL_SEED"),
            ..defaults
        }
    }

    /// Team threshold in effect, reduced to 1 in test mode
    pub fn required_teams(&self) -> usize {
        if self.test_mode {
            1
        } else {
            self.min_teams.max(1)
        }
    }

    /// Short timings and a single-team threshold, for tests
    pub fn for_tests() -> Self {
        Self {
            test_mode: true,
            countdown_secs: 3,
            grace_secs: 5,
            cooldown_secs: 1,
            fade_timeout: Duration::from_millis(50),
            seed: Some(7),
            ..Self::default()
        }
    }
}
