//! Block generation strategies.
//!
//! No strategy ever emits [`ABORT_BYTE`]: the remote side would leave echo
//! mode in the middle of a block.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serialcheck_io::ABORT_BYTE;

/// Lowest byte value any generator produces.
pub const MIN_BLOCK_BYTE: u8 = ABORT_BYTE + 1;

pub trait BlockGenerator: Send {
    fn generate(&mut self, len: usize) -> Vec<u8>;
}

/// `f(i) = 4 + i / 64`, wrapped so the value stays within `4..=255`.
pub fn deterministic_byte(index: usize) -> u8 {
    let span = (u8::MAX - MIN_BLOCK_BYTE) as usize + 1;
    MIN_BLOCK_BYTE + ((index / 64) % span) as u8
}

/// Pure function of index and length; the same block every time.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicBlocks;

impl BlockGenerator for DeterministicBlocks {
    fn generate(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(deterministic_byte).collect()
    }
}

#[derive(Debug)]
pub struct RandomBlocks {
    rng: StdRng,
}

impl RandomBlocks {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomBlocks {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockGenerator for RandomBlocks {
    fn generate(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|_| self.rng.gen_range(MIN_BLOCK_BYTE..=u8::MAX))
            .collect()
    }
}

/// Which generator a probe run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeneratorKind {
    #[default]
    Deterministic,
    Random {
        seed: Option<u64>,
    },
}

impl GeneratorKind {
    pub fn build(&self) -> Box<dyn BlockGenerator> {
        match *self {
            GeneratorKind::Deterministic => Box::new(DeterministicBlocks),
            GeneratorKind::Random { seed: Some(seed) } => Box::new(RandomBlocks::seeded(seed)),
            GeneratorKind::Random { seed: None } => Box::new(RandomBlocks::new()),
        }
    }
}
