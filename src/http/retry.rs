//! Retry policies for outbound requests.

use crate::error::TransportError;
use serde::Deserialize;
use std::time::Duration;

/// Retry policy for an envelope.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// No retries.
    #[default]
    None,
    /// Retry on network failures and rate limiting. Default for reads.
    Idempotent,
    /// Retry on rate limiting only. Used for order placement, where a network
    /// failure leaves it unknown whether the backend acted.
    NonIdempotent,
    /// User-provided retry logic.
    Custom(RetryConfig),
}

impl RetryPolicy {
    pub fn config(&self) -> Option<RetryConfig> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Idempotent => Some(RetryConfig::idempotent()),
            RetryPolicy::NonIdempotent => Some(RetryConfig::non_idempotent()),
            RetryPolicy::Custom(config) => Some(config.clone()),
        }
    }

    /// Backoff before retrying `err`, or `None` when it must be surfaced.
    /// `attempt` is the 0-indexed attempt that just failed.
    pub fn backoff(&self, err: &TransportError, attempt: u32) -> Option<Duration> {
        self.config()?.backoff(err, attempt)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(with = "crate::shared::serde_util::duration_ms")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Whether to add jitter to the delay.
    pub jitter: bool,
    /// Whether connection failures and timeouts are retried. Rate limiting
    /// is always retried while attempts remain.
    pub retry_network: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::idempotent()
    }
}

impl RetryConfig {
    /// The default config for reads.
    pub fn idempotent() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
            retry_network: true,
        }
    }

    /// Writes that must not be repeated after an ambiguous failure.
    pub fn non_idempotent() -> Self {
        Self {
            retry_network: false,
            ..Self::idempotent()
        }
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            let jitter_range = capped * 0.25;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Delay before retrying `err` after `attempt`, honouring a server-provided
    /// retry-after when it is longer than the computed backoff.
    pub fn backoff(&self, err: &TransportError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        match err {
            TransportError::RateLimited { retry_after_ms } => {
                let delay = self.delay_for_attempt(attempt);
                let server = retry_after_ms.map(Duration::from_millis).unwrap_or_default();
                Some(delay.max(server))
            }
            TransportError::Network(_) if self.retry_network => {
                Some(self.delay_for_attempt(attempt))
            }
            _ => None,
        }
    }
}
