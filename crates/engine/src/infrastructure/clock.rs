//! Clock and random implementations.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::infrastructure::ports::{ClockPort, RandomPort};

/// System clock - uses real time.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for SystemClock {
    fn now_epoch(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// System random - uses real randomness.
pub struct SystemRandom;

impl SystemRandom {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomPort for SystemRandom {
    fn next_f64(&self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen::<f64>()
    }

    fn gen_range(&self, min: i32, max: i32) -> i32 {
        use rand::Rng;
        rand::thread_rng().gen_range(min..=max)
    }

    fn pick_index(&self, len: usize) -> usize {
        use rand::Rng;
        rand::thread_rng().gen_range(0..len)
    }
}

/// Fixed clock for testing.
pub struct FixedClock(pub f64);

impl ClockPort for FixedClock {
    fn now_epoch(&self) -> f64 {
        self.0
    }
}

/// Deterministic random for testing: cycles through a fixed sequence of
/// rolls; ranges always return their minimum.
pub struct SeqRandom {
    rolls: Vec<f64>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl SeqRandom {
    pub fn new(rolls: Vec<f64>) -> Self {
        Self {
            rolls,
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl RandomPort for SeqRandom {
    fn next_f64(&self) -> f64 {
        if self.rolls.is_empty() {
            return 0.0;
        }
        let i = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.rolls[i % self.rolls.len()]
    }

    fn gen_range(&self, min: i32, _max: i32) -> i32 {
        min
    }

    fn pick_index(&self, _len: usize) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::weighted_index;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock::new().now_epoch() > 1_577_836_800.0);
    }

    #[test]
    fn seq_random_cycles() {
        let random = SeqRandom::new(vec![0.1, 0.9]);
        assert_eq!(random.next_f64(), 0.1);
        assert_eq!(random.next_f64(), 0.9);
        assert_eq!(random.next_f64(), 0.1);
    }

    #[test]
    fn weighted_index_respects_weights() {
        let low = SeqRandom::new(vec![0.0]);
        assert_eq!(weighted_index(&low, &[10.0, 90.0]), 0);
        let high = SeqRandom::new(vec![0.99]);
        assert_eq!(weighted_index(&high, &[10.0, 90.0]), 1);
    }

    #[test]
    fn weighted_index_skips_non_positive_weights() {
        let random = SeqRandom::new(vec![0.0]);
        assert_eq!(weighted_index(&random, &[0.0, -3.0, 5.0]), 2);
    }
}
