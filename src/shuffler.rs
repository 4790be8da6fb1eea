use core::fmt;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::card::{Card, N_PILES, N_RANKS};
use crate::state::Spider;

pub const MIN_SUITS: u8 = 1;
pub const MAX_SUITS: u8 = 4;

/// Deal configuration for a Spider game.
///
/// The seed drives the shuffle; the analyzer always supplies one so results
/// stay reproducible, while an interactive deal may leave it unset and get
/// an OS-seeded shuffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub suits: u8,
    pub piles: u8,
    pub stack_count: usize,
    pub initial_dealt: usize,
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            suits: 4,
            piles: N_PILES,
            stack_count: 10,
            initial_dealt: 54,
            seed: None,
        }
    }
}

impl GameConfig {
    #[must_use]
    pub fn with_seed(suits: u8, seed: u64) -> Self {
        Self {
            suits,
            seed: Some(seed),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    UnsupportedSuits(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedSuits(suits) => {
                write!(f, "unsupported suit count {suits}, expected 1..=4")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

const fn ceil_div(x: u8, y: u8) -> u8 {
    (x + y - 1) / y
}

/// Build and shuffle the 104-card multiset: suit `i` contributes
/// `ceil(remaining_piles / (suits - i))` piles of 13, eight piles total.
pub fn init_base(config: &GameConfig) -> Result<Vec<Card>, ConfigError> {
    if !(MIN_SUITS..=MAX_SUITS).contains(&config.suits) {
        return Err(ConfigError::UnsupportedSuits(config.suits));
    }

    let mut cards = Vec::with_capacity(config.piles as usize * N_RANKS as usize);
    let mut remaining_piles = config.piles;
    for suit in 0..config.suits {
        let count = ceil_div(remaining_piles, config.suits - suit);
        remaining_piles -= count;
        for rank in 0..N_RANKS {
            for _ in 0..count {
                cards.push(Card::new(suit, rank));
            }
        }
    }

    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    cards.shuffle(&mut rng);
    Ok(cards)
}

/// Deterministically deal the initial position: `initial_dealt` cards drawn
/// from the top of the base, round-robin starting at stack 0, with only the
/// top card of each column face-up.
pub fn build_initial_state(config: &GameConfig) -> Result<Spider, ConfigError> {
    let mut base = init_base(config)?;
    let mut stacks: Vec<Vec<Card>> = vec![Vec::new(); config.stack_count];

    let mut dest = 0;
    for _ in 0..config.initial_dealt {
        let Some(card) = base.pop() else { break };
        stacks[dest].push(card);
        dest = (dest + 1) % stacks.len();
    }

    let hidden = stacks
        .iter()
        .map(|stack| stack.len().saturating_sub(1) as u8)
        .collect();
    Ok(Spider::new(base, stacks, hidden, 0))
}
