use std::time::Duration;

/// Batching and retry knobs for the [`BufferedWriter`](super::BufferedWriter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    /// Queue length that triggers an immediate flush.
    pub batch_size: usize,
    /// Longest a partial batch waits before it is flushed anyway.
    pub batch_timeout: Duration,
    /// Retries granted to a failing batch before the failure is surfaced.
    pub max_retry_attempts: u32,
    /// Backoff unit; retry `n` waits `n * base_retry_delay`.
    pub base_retry_delay: Duration,
    /// Upper bound on message content, in characters.
    pub max_content_length: usize,
}

impl WriterConfig {
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.base_retry_delay.saturating_mul(attempt)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_timeout: Duration::from_millis(1_000),
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_millis(1_000),
            max_content_length: 10_000,
        }
    }
}
