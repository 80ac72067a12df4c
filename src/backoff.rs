use std::time::Duration;

use rand::Rng;

/// Maps a zero-indexed retry number to the wait before the next attempt.
///
/// Strategies are pure with respect to their configuration and safe to share
/// across calls. Jittered strategies draw from a locally-owned random source
/// per call to avoid lock contention.
pub trait Backoff: Send + Sync {
    fn delay(&self, retry: usize) -> Duration;
}

/// `initial * factor^retry`, capped at `max`. With jitter enabled the
/// returned delay is sampled uniformly from `[0, raw]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor: 2.0,
            jitter: true,
        }
    }

    pub const fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry: usize) -> Duration {
        let factor = if self.factor <= 0.0 { 2.0 } else { self.factor };
        let exponent = retry.min(i32::MAX as usize) as i32;
        let raw = (self.initial.as_secs_f64() * factor.powi(exponent))
            .min(self.max.as_secs_f64())
            .max(0.0);
        if !self.jitter || raw <= 0.0 {
            return Duration::from_secs_f64(raw);
        }
        let mut rng = rand::rng();
        Duration::from_secs_f64(rng.random_range(0.0..=raw))
    }
}

/// `step * (retry + 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearBackoff {
    step: Duration,
}

impl LinearBackoff {
    pub const fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, retry: usize) -> Duration {
        let multiplier = retry.saturating_add(1).min(u32::MAX as usize) as u32;
        self.step.saturating_mul(multiplier)
    }
}

/// The same interval regardless of the retry number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstantBackoff {
    interval: Duration,
}

impl ConstantBackoff {
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Backoff for ConstantBackoff {
    fn delay(&self, _retry: usize) -> Duration {
        self.interval
    }
}
