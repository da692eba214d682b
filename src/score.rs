//! Chain scoring.
//!
//! A chain is rejected when it contains two adjacent `a`/`A` characters or
//! has no spaces. Otherwise its weight is
//! `(letters * 1.5 + digits * 2) / spaces`, where `letters` is everything
//! that is neither a digit nor a space.

use std::fmt;

/// Why a chain was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Two adjacent `a` characters, case-insensitive.
    DoubleA,
    /// No space characters at all.
    NoSpaces,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::DoubleA => f.write_str("double 'a' rule"),
            Rejection::NoSpaces => f.write_str("chain has no spaces"),
        }
    }
}

/// Outcome of scoring one chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Valid(f64),
    Invalid(Rejection),
}

/// Score a single chain.
pub fn score(chain: &str) -> Score {
    let bytes = chain.as_bytes();
    let double_a = bytes
        .windows(2)
        .any(|w| w[0].eq_ignore_ascii_case(&b'a') && w[1].eq_ignore_ascii_case(&b'a'));
    if double_a {
        return Score::Invalid(Rejection::DoubleA);
    }

    let mut length = 0usize;
    let mut digits = 0usize;
    let mut spaces = 0usize;
    for c in chain.chars() {
        length += 1;
        if c.is_ascii_digit() {
            digits += 1;
        } else if c == ' ' {
            spaces += 1;
        }
    }
    if spaces == 0 {
        return Score::Invalid(Rejection::NoSpaces);
    }

    let letters = length - digits - spaces;
    Score::Valid((letters as f64 * 1.5 + digits as f64 * 2.0) / spaces as f64)
}

/// Scoring strategy used by a connection.
pub trait Scorer: Send + Sync {
    fn score(&self, chain: &str) -> Score;
}

/// The standard scoring rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainScorer;

impl Scorer for ChainScorer {
    fn score(&self, chain: &str) -> Score {
        score(chain)
    }
}

/// Format a result line: `<chain> : <weight to 2 decimals>`.
pub fn result_line(chain: &str, weight: f64) -> String {
    format!("{chain} : {weight:.2}")
}
