//! Subscription generations.
//!
//! Every subscription a live list opens is stamped with a fresh generation.
//! Events carry the token of the subscription that produced them, so events
//! from a torn-down subscription can be recognised and dropped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one subscription attempt of one live list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    /// The raw generation number.
    pub fn generation(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Monotonic source of subscription tokens.
///
/// Tokens are never reused: a token issued after another always compares
/// greater.
#[derive(Debug, Clone, Default)]
pub struct Generations {
    counter: u64,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next token.
    pub fn next_token(&mut self) -> SubscriptionToken {
        self.counter += 1;
        SubscriptionToken(self.counter)
    }

    /// The most recently issued generation (0 if none).
    pub fn current(&self) -> u64 {
        self.counter
    }
}
