//! Reconnect budget and backoff strategies.
//!
//! [`ReconnectBudget`] decides *whether* a closed connection is retried.
//! A [`Backoff`] decides *when*. The two are independent: swapping the
//! backoff never changes how many attempts the budget allows.

use std::fmt;
use std::time::Duration;

use rand::Rng;

/// What to do after the transport reports a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again.
    Retry,
    /// Stay closed. Issued once the budget is spent (or was zero).
    GiveUp,
}

/// Signed reconnect counter.
///
/// * `< 0` retries forever and never changes.
/// * `0` never retries.
/// * `> 0` retries that many more times, counting down on every closure.
///
/// Reaching zero is permanent; the budget is never replenished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectBudget(i32);

impl ReconnectBudget {
    /// Retry forever.
    pub const FOREVER: Self = Self(-1);
    /// Never retry.
    pub const NEVER: Self = Self(0);

    /// Allow exactly `attempts` reconnects.
    pub fn bounded(attempts: u32) -> Self {
        Self(i32::try_from(attempts).unwrap_or(i32::MAX))
    }

    /// Raw counter value.
    pub fn remaining(self) -> i32 {
        self.0
    }

    /// True for a negative (unlimited) budget.
    pub fn is_unlimited(self) -> bool {
        self.0 < 0
    }

    /// True once no further reconnects are allowed.
    pub fn is_exhausted(self) -> bool {
        self.0 == 0
    }

    /// Consume one closure notification.
    pub fn on_closed(&mut self) -> ReconnectDecision {
        match self.0 {
            n if n < 0 => ReconnectDecision::Retry,
            0 => ReconnectDecision::GiveUp,
            _ => {
                self.0 -= 1;
                ReconnectDecision::Retry
            }
        }
    }
}

impl From<i32> for ReconnectBudget {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ReconnectBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            n if n < 0 => f.write_str("unlimited"),
            n => write!(f, "{n} remaining"),
        }
    }
}

/// Delay strategy applied before each reconnect attempt.
pub trait Backoff {
    /// Delay before the given attempt. `attempt` starts at 1 after every
    /// successful connection.
    fn delay(&mut self, attempt: u32) -> Duration;
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn delay(&mut self, attempt: u32) -> Duration {
        (**self).delay(attempt)
    }
}

/// Retry with no delay at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Backoff for Immediate {
    fn delay(&mut self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Retry after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Backoff for FixedDelay {
    fn delay(&mut self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Configuration for [`ExponentialBackoff`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt. Default: 2.0.
    pub multiplier: f64,
    /// Upper bound on any single delay. Default: 30 s.
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0), applied as ±jitter. Default: 0.25.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

/// Exponentially growing delay with optional jitter, capped at `max_delay`.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Create a backoff from the given config.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.config.multiplier.powi(exponent);
        let secs = self.config.initial_delay.as_secs_f64() * factor;
        let max = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.config.max_delay
        } else {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&mut self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);

        // Uniform in [base * (1 - jitter), base * (1 + jitter)]
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let jittered = if jitter > 0.0 {
            let mut rng = rand::rng();
            let factor = rng.random_range((1.0 - jitter)..=(1.0 + jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        jittered.min(self.config.max_delay)
    }
}
