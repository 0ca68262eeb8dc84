//! Same-source retry pacing
//!
//! This is the short in-attempt delay between consecutive tries on one
//! source. The multi-day whole-payload gate lives in `upd-backoff`.

use crate::config::RetryConfig;
use std::time::Duration;

/// Calculate exponential backoff delay with jitter
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub(crate) fn retry_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    // Millisecond precision is plenty for pacing retries
    let base = retry.initial_delay_ms as f64;
    let max = retry.max_delay_ms as f64;

    let delay = (base * retry.backoff_multiplier.powi(attempt.saturating_sub(1) as i32)).min(max);
    let jitter = delay * retry.jitter_factor * (rand::random::<f64>() - 0.5);
    Duration::from_millis((delay + jitter).max(0.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let retry = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let first = retry_delay(&retry, 1);
        let second = retry_delay(&retry, 2);
        let huge = retry_delay(&retry, 30);

        assert_eq!(first, Duration::from_millis(500));
        assert_eq!(second, Duration::from_millis(1000));
        assert_eq!(huge, Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_near_nominal() {
        let retry = RetryConfig::default();
        for _ in 0..100 {
            let d = retry_delay(&retry, 1).as_millis();
            assert!((450..=550).contains(&d), "delay {d}ms outside jitter band");
        }
    }
}
