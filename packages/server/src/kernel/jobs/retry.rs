//! Retry backoff policy.
//!
//! Pure: the same `(profile, attempt, jitter)` always yields the same
//! decision. Two profiles coexist — downloads/sync use a large base with a
//! moderate attempt cap, watchlist/artist work uses a smaller base spread
//! over a longer span. Handlers pick their profile at registration.

use std::time::Duration;

use serde::Serialize;

use crate::kernel::clock::Jitter;

/// Named profile selected by a handler entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryProfileKind {
    Download,
    Watchlist,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryProfile {
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter fraction. Values above 1.0 are read as percentages
    /// and divided by 100; this normalization is a contract.
    pub jitter_pct: f64,
}

impl RetryProfile {
    pub fn normalized_jitter(&self) -> f64 {
        if self.jitter_pct > 1.0 {
            self.jitter_pct / 100.0
        } else {
            self.jitter_pct.max(0.0)
        }
    }
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            // 2s * 2^6
            max_delay: Duration::from_secs(128),
            jitter_pct: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Delay(Duration),
    Exhausted,
}

/// Compute the delay before `attempt` (1-based: the attempt about to be
/// recorded). Exhausted once `attempt` reaches the profile cap.
pub fn next_delay(profile: &RetryProfile, attempt: i32, jitter: &dyn Jitter) -> RetryDecision {
    if attempt >= profile.max_attempts {
        return RetryDecision::Exhausted;
    }

    let exponent = attempt.saturating_sub(1).min(30) as u32;
    let raw = profile
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(profile.max_delay);

    let pct = profile.normalized_jitter();
    let factor = 1.0 + jitter.uniform(-pct, pct);
    let millis = (raw.as_millis() as f64 * factor).max(0.0);

    RetryDecision::Delay(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::clock::FixedJitter;

    fn profile(max_attempts: i32, base_ms: u64, jitter_pct: f64) -> RetryProfile {
        RetryProfile {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(128),
            jitter_pct,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let p = profile(10, 100, 0.0);
        let j = FixedJitter(0.0);

        assert_eq!(
            next_delay(&p, 1, &j),
            RetryDecision::Delay(Duration::from_millis(100))
        );
        assert_eq!(
            next_delay(&p, 2, &j),
            RetryDecision::Delay(Duration::from_millis(200))
        );
        assert_eq!(
            next_delay(&p, 4, &j),
            RetryDecision::Delay(Duration::from_millis(800))
        );
    }

    #[test]
    fn delay_clamps_to_max() {
        let p = RetryProfile {
            max_attempts: 64,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(128),
            jitter_pct: 0.0,
        };
        let j = FixedJitter(0.0);

        assert_eq!(
            next_delay(&p, 20, &j),
            RetryDecision::Delay(Duration::from_secs(128))
        );
    }

    #[test]
    fn exhausted_at_max_attempts() {
        let p = profile(2, 100, 0.0);
        let j = FixedJitter(0.0);

        assert!(matches!(next_delay(&p, 1, &j), RetryDecision::Delay(_)));
        assert_eq!(next_delay(&p, 2, &j), RetryDecision::Exhausted);
        assert_eq!(next_delay(&p, 3, &j), RetryDecision::Exhausted);
    }

    #[test]
    fn max_attempts_of_one_never_delays() {
        let p = profile(1, 100, 0.0);
        assert_eq!(next_delay(&p, 1, &FixedJitter(0.0)), RetryDecision::Exhausted);
    }

    #[test]
    fn jitter_over_one_is_read_as_percentage() {
        let p = profile(5, 100, 150.0);
        assert!((p.normalized_jitter() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn jitter_widens_and_narrows_the_delay() {
        let p = profile(5, 100, 0.2);

        // +20%
        assert_eq!(
            next_delay(&p, 1, &FixedJitter(0.2)),
            RetryDecision::Delay(Duration::from_millis(120))
        );
        // -20%
        assert_eq!(
            next_delay(&p, 1, &FixedJitter(-0.2)),
            RetryDecision::Delay(Duration::from_millis(80))
        );
    }

    #[test]
    fn negative_factor_clamps_to_zero() {
        // jitter_pct 150 normalizes to 1.5; a -1.5 sample would go negative
        let p = profile(5, 100, 150.0);
        assert_eq!(
            next_delay(&p, 1, &FixedJitter(-1.5)),
            RetryDecision::Delay(Duration::from_millis(0))
        );
    }

    #[test]
    fn deterministic_under_fixed_jitter() {
        let p = profile(5, 250, 0.2);
        let a = next_delay(&p, 3, &FixedJitter(0.1));
        let b = next_delay(&p, 3, &FixedJitter(0.1));
        assert_eq!(a, b);
    }
}
