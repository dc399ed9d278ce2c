use crate::tts::SynthesisError;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `attempt` is zero-based: the first call is attempt 0
    pub fn should_retry(&self, attempt: u32, error: &SynthesisError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        error.is_retryable()
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub async fn wait_before_retry(&self, index: usize, attempt: u32) {
        let delay = self.backoff_delay(attempt);

        tracing::info!(
            "Segment {}: retrying in {}ms (attempt {})",
            index,
            delay.as_millis(),
            attempt + 2
        );
        sleep(delay).await;
    }
}
