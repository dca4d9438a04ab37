use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::{ReconnectConfig, RetryConfig};

/// Exponential delay with ±10% jitter, capped at a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    next_ms: u64,
    max_ms: u64,
    multiplier: u64,
}

impl Backoff {
    pub fn new(initial_ms: u64, max_ms: u64, multiplier: u64) -> Self {
        Self {
            initial_ms,
            next_ms: initial_ms,
            max_ms,
            multiplier: multiplier.max(1),
        }
    }

    pub fn from_reconnect(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay_ms, config.max_delay_ms, 2)
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay_ms = self.next_ms.min(self.max_ms);
        let jitter = rand::random_range(-0.1..=0.1);
        let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

        self.next_ms = delay_ms.saturating_mul(self.multiplier).min(self.max_ms);

        Duration::from_millis(jittered_delay)
    }

    pub fn reset(&mut self) {
        self.next_ms = self.initial_ms;
    }
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut backoff = Backoff::new(
        config.initial_delay_ms,
        config.max_delay_ms,
        config.backoff_multiplier,
    );

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let delay = backoff.next_delay();

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                sleep(delay).await;
            }
        }
    }
}

/// Cuts `message` to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }

    let mut truncated: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
