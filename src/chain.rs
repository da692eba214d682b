//! Chain (record) generation.
//!
//! A chain is `L` characters drawn from ASCII letters and digits, with `S`
//! of them replaced by spaces:
//! - `L` in `[MIN_LENGTH_CHAIN, MAX_LENGTH_CHAIN]`
//! - `S` in `[MIN_NUM_SPACES, MAX_NUM_SPACES]`
//! - no two spaces adjacent, never at the first or last position
//!
//! Space positions are picked by rejection sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

pub const VALID_CHARS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const MIN_LENGTH_CHAIN: usize = 50;
pub const MAX_LENGTH_CHAIN: usize = 100;
pub const MIN_NUM_SPACES: usize = 3;
pub const MAX_NUM_SPACES: usize = 5;

/// One generated record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain(String);

impl Chain {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Chain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a single chain from `rng`.
pub fn generate_chain<R: Rng + ?Sized>(rng: &mut R) -> Chain {
    let length = rng.random_range(MIN_LENGTH_CHAIN..=MAX_LENGTH_CHAIN);
    let num_spaces = rng.random_range(MIN_NUM_SPACES..=MAX_NUM_SPACES);

    let mut spaces: Vec<usize> = Vec::with_capacity(num_spaces);
    while spaces.len() < num_spaces {
        // Interior positions only: [1, length - 2]
        let candidate = rng.random_range(1..length - 1);
        let taken = spaces
            .iter()
            .any(|&pos| pos.abs_diff(candidate) <= 1);
        if !taken {
            spaces.push(candidate);
        }
    }

    let mut bytes: Vec<u8> = (0..length)
        .map(|_| VALID_CHARS[rng.random_range(0..VALID_CHARS.len())])
        .collect();
    for pos in spaces {
        bytes[pos] = b' ';
    }

    // Only ASCII bytes were written above.
    Chain(bytes.into_iter().map(char::from).collect())
}

/// Lazy, unbounded sequence of chains.
pub struct ChainGenerator<R> {
    rng: R,
}

impl<R: Rng> ChainGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl ChainGenerator<StdRng> {
    /// Generator with a reproducible sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Iterator for ChainGenerator<R> {
    type Item = Chain;

    fn next(&mut self) -> Option<Chain> {
        Some(generate_chain(&mut self.rng))
    }
}

/// Generate a finite batch of `count` chains.
pub fn generate_chains<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Chain> {
    (0..count).map(|_| generate_chain(rng)).collect()
}
