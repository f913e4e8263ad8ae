//! Task generation
//!
//! Tasks are plain integers drawn uniformly from `[0, TASK_UPPER_BOUND)`.
//! The generator is seeded once per coordinator and makes no promise of
//! distinct values across calls or workers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Exclusive upper bound of generated task values
pub const TASK_UPPER_BOUND: i32 = 1000;

/// Source of task values
pub struct TaskGenerator {
    rng: StdRng,
    seed: Option<u64>,
}

impl TaskGenerator {
    /// Seed from the operating system
    fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            seed: None,
        }
    }

    /// Fixed seed, for reproducible runs
    fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    /// Seed from `seed` when given, otherwise from the operating system
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// The fixed seed, if one was used
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Draw the next task value
    pub fn next_task(&mut self) -> i32 {
        self.rng.random_range(0..TASK_UPPER_BOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_in_range() {
        let mut tasks = TaskGenerator::from_entropy();
        for _ in 0..10_000 {
            let v = tasks.next_task();
            assert!((0..TASK_UPPER_BOUND).contains(&v));
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = TaskGenerator::seeded(7);
        let mut b = TaskGenerator::seeded(7);
        let xs: Vec<i32> = (0..32).map(|_| a.next_task()).collect();
        let ys: Vec<i32> = (0..32).map(|_| b.next_task()).collect();
        assert_eq!(xs, ys);
        assert_eq!(a.seed(), Some(7));
    }

    #[test]
    fn test_covers_the_range() {
        let mut tasks = TaskGenerator::seeded(1);
        let mut low = false;
        let mut high = false;
        for _ in 0..10_000 {
            let v = tasks.next_task();
            low |= v < 100;
            high |= v >= 900;
        }
        assert!(low && high);
    }
}
