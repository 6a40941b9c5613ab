//! Exponential backoff for batch fetches.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
    /// Up to `jitter_fraction * backoff` of random extra delay, so that
    /// concurrent streams do not retry in lockstep. `0.0` disables it.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Stateless retry policy, computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);

        let spread = capped * self.config.jitter_fraction.min(1.0);
        let jitter_ms = if spread > 0.0 {
            rand::thread_rng().gen_range(0.0..=spread)
        } else {
            0.0
        };
        Some(Duration::from_millis((capped + jitter_ms) as u64))
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(no_jitter(3));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
            ..no_jitter(10)
        });
        let d5 = policy.next_delay(5).unwrap();
        assert!(d5 <= Duration::from_millis(500), "d5={d5:?} exceeds max");
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter_fraction: 0.5,
            ..no_jitter(3)
        });
        let delays: Vec<Duration> = (0..50).map(|_| policy.next_delay(2).unwrap()).collect();
        for d in &delays {
            assert!(
                *d >= Duration::from_millis(200) && *d <= Duration::from_millis(300),
                "{d:?}"
            );
        }
    }

    #[test]
    fn negative_jitter_is_ignored() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter_fraction: -1.0,
            ..no_jitter(1)
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
    }

    #[test]
    fn none_never_retries() {
        assert!(RetryPolicy::new(RetryConfig::none()).next_delay(1).is_none());
    }

    #[test]
    fn config_from_millis() {
        let cfg: RetryConfig =
            serde_json::from_str(r#"{"max_retries": 5, "initial_backoff": 250}"#).unwrap();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.initial_backoff, Duration::from_millis(250));
        assert_eq!(cfg.max_backoff, Duration::from_secs(10));
    }
}
