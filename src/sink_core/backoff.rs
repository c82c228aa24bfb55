use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff with jitter
///
/// Delay for attempt `n` is drawn from `[d/2, d]` where
/// `d = min(initial * 2^n, max)`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Maximum retry attempts exceeded ({0})")]
pub struct MaxRetriesExceeded(pub u32);

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Next delay, or None once the retry budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }

        let factor = 2u32.saturating_pow(self.current_attempt.min(20));
        let ceiling = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        self.current_attempt += 1;

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return Some(ceiling);
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Some(Duration::from_millis(jittered))
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let Some(delay) = self.next_delay() else {
            return Err(MaxRetriesExceeded(self.max_retries));
        };

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt,
            self.max_retries,
            delay.as_millis()
        );

        sleep(delay).await;
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
