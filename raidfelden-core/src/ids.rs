//! Random external raid identifiers.
//!
//! Both sources are safe to share between threads: [`ThreadRngIds`] draws from
//! the calling thread's own generator, [`SeededIds`] serialises access to a
//! single seeded generator so a test run is reproducible.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::ExternalId;

/// Source of fresh raid identifiers.
pub trait ExternalIdSource: Send + Sync {
    /// Draw the next identifier.
    fn next_id(&self) -> ExternalId;
}

/// Identifiers from the per-thread OS-seeded generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngIds;

impl ExternalIdSource for ThreadRngIds {
    fn next_id(&self) -> ExternalId {
        ExternalId(rand::thread_rng().r#gen())
    }
}

/// Deterministic identifiers from a fixed seed.
#[derive(Debug)]
pub struct SeededIds {
    rng: Mutex<StdRng>,
}

impl SeededIds {
    /// Create a source seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ExternalIdSource for SeededIds {
    fn next_id(&self) -> ExternalId {
        ExternalId(self.rng.lock().r#gen())
    }
}
