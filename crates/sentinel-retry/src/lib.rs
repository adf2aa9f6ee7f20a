//! Exponential backoff retry for secret backend operations (§4.J): initial
//! 1s, doubling, capped at 30s, ±25% jitter, 3 attempts by default, retrying
//! only on a fixed set of transient error tags.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error tags the retry policy treats as transient. Matched against
/// whatever string identifier a backend call failure carries (an errno
/// name, an HTTP status class, or a provider error code).
pub const TRANSIENT_ERROR_TAGS: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "ECONNREFUSED",
    "ENETUNREACH",
    "EAI_AGAIN",
    "NetworkError",
    "Throttling",
    "ServiceUnavailable",
];

/// Returns true if `tag` should be retried, including the HTTP 429/5xx
/// convention (status codes passed as their decimal string).
pub fn is_transient(tag: &str) -> bool {
    if TRANSIENT_ERROR_TAGS.contains(&tag) {
        return true;
    }
    if tag == "429" {
        return true;
    }
    if let Ok(code) = tag.parse::<u16>() {
        return (500..600).contains(&code);
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(
        serialize_with = "sentinel_duration::serialize_duration",
        deserialize_with = "sentinel_duration::deserialize_duration"
    )]
    pub base_delay: Duration,
    #[serde(
        serialize_with = "sentinel_duration::serialize_duration",
        deserialize_with = "sentinel_duration::deserialize_duration"
    )]
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fraction in `[0, 1]` of jitter applied to each computed delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
            jitter: 0.25,
        }
    }
}

/// Compute the delay before `attempt` (1-based), exponential with a cap,
/// before jitter is applied.
fn exponential_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let factor = 2u64.saturating_pow(exp);
    let millis = config
        .base_delay
        .as_millis()
        .saturating_mul(factor as u128)
        .min(config.max_delay.as_millis());
    Duration::from_millis(millis as u64)
}

/// Apply ±`jitter` fractional jitter to a delay.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 - jitter + rand::random::<f64>() * (2.0 * jitter);
    let millis = (delay.as_millis() as f64 * factor).max(0.0);
    Duration::from_millis(millis as u64)
}

/// The delay to wait before retry attempt number `attempt` (1-based),
/// capped at `config.max_delay` and jittered.
pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = exponential_delay(config, attempt);
    apply_jitter(base, config.jitter).min(config.max_delay)
}

/// Run `op`, retrying up to `config.max_attempts` times while the returned
/// error tag (via `classify`) is transient. `sleep` is injected so tests
/// don't have to wait on real backoff delays.
pub fn retry_with<T, E>(
    config: &RetryConfig,
    mut op: impl FnMut(u32) -> Result<T, E>,
    classify: impl Fn(&E) -> &str,
    mut sleep: impl FnMut(Duration),
) -> Result<T, E> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let tag = classify(&err);
                if attempt >= config.max_attempts || !is_transient(tag) {
                    return Err(err);
                }
                sleep(calculate_delay(config, attempt));
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn is_transient_matches_known_tags() {
        assert!(is_transient("ETIMEDOUT"));
        assert!(is_transient("Throttling"));
        assert!(!is_transient("AccessDenied"));
    }

    #[test]
    fn is_transient_matches_http_status_classes() {
        assert!(is_transient("429"));
        assert!(is_transient("503"));
        assert!(!is_transient("404"));
        assert!(!is_transient("200"));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(exponential_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(exponential_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(exponential_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(exponential_delay(&config, 10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..200 {
            let jittered = apply_jitter(base, 0.25);
            assert!(jittered >= Duration::from_millis(7500));
            assert!(jittered <= Duration::from_millis(12500));
        }
    }

    #[test]
    fn retry_with_gives_up_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            jitter: 0.0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = RefCell::new(0);
        let sleeps: RefCell<Vec<Duration>> = RefCell::new(Vec::new());
        let result: Result<(), &str> = retry_with(
            &config,
            |_attempt| {
                *calls.borrow_mut() += 1;
                Err("ETIMEDOUT")
            },
            |e| e,
            |d| sleeps.borrow_mut().push(d),
        );
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 3);
        assert_eq!(sleeps.borrow().len(), 2);
    }

    #[test]
    fn retry_with_does_not_retry_permanent_errors() {
        let config = RetryConfig::default();
        let calls = RefCell::new(0);
        let result: Result<(), &str> = retry_with(
            &config,
            |_attempt| {
                *calls.borrow_mut() += 1;
                Err("AccessDenied")
            },
            |e| e,
            |_| panic!("should not sleep on a permanent error"),
        );
        assert!(result.is_err());
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn retry_with_succeeds_after_transient_failure() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        };
        let calls = RefCell::new(0);
        let result = retry_with(
            &config,
            |attempt| {
                *calls.borrow_mut() += 1;
                if attempt < 2 {
                    Err("ECONNRESET")
                } else {
                    Ok(42)
                }
            },
            |e| *e,
            |_| {},
        );
        assert_eq!(result, Ok(42));
        assert_eq!(*calls.borrow(), 2);
    }

    proptest::proptest! {
        #[test]
        fn calculate_delay_never_exceeds_max(attempt in 1u32..30) {
            let config = RetryConfig::default();
            let delay = calculate_delay(&config, attempt);
            prop_assert!(delay <= config.max_delay);
        }
    }
}
