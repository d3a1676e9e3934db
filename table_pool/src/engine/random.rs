//! Injectable randomness for shuffles and invite tokens.

use rand::{Rng, SeedableRng, distr::Alphanumeric, rngs::StdRng, seq::SliceRandom};
use std::sync::{Mutex, PoisonError};

/// Length of generated invite tokens
pub const INVITE_TOKEN_LEN: usize = 16;

/// Source of randomness used by splits, settlements and table creation
pub trait RandomSource: Send + Sync {
    /// Uniform random permutation of `0..len`
    fn permutation(&self, len: usize) -> Vec<usize>;

    /// Fresh opaque invite token
    fn token(&self) -> String;
}

/// Reorder `items` by a permutation drawn from `source`
pub fn shuffled<T: Clone>(source: &dyn RandomSource, items: &[T]) -> Vec<T> {
    source
        .permutation(items.len())
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

/// Thread-local OS-seeded randomness
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn permutation(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rand::rng());
        order
    }

    fn token(&self) -> String {
        let mut rng = rand::rng();
        (0..INVITE_TOKEN_LEN)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }
}

/// Deterministic randomness for reproducible runs
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn permutation(&self, len: usize) -> Vec<usize> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut *rng);
        order
    }

    fn token(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        (0..INVITE_TOKEN_LEN)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect()
    }
}
