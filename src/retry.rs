use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CollectorError, Result};

/// Exponential backoff: a delay that doubles on each step up to a cap.
///
/// The two canonical shapes match the cluster API retry behavior:
/// connect-path retries start at 1s and cap at 30 minutes, read-path
/// retries start at 10s and cap at 1280s.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { delay: initial, cap }
    }

    /// Backoff shape for session/connect retries: 1s, 2s, 4s, ... capped at 1800s.
    pub fn connect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(1800))
    }

    /// Backoff shape for stat-read and write retries: 10s, 20s, ... capped at 1280s.
    pub fn read() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(1280))
    }

    /// Returns the delay to sleep now and advances to the next step.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = std::cmp::min(self.delay.saturating_mul(2), self.cap);
        current
    }
}

/// A configured ceiling on retry attempts. Zero or negative means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct RetryLimit(i64);

impl RetryLimit {
    pub fn new(max_attempts: i64) -> Self {
        Self(max_attempts)
    }

    pub fn unlimited() -> Self {
        Self(0)
    }

    /// Whether attempt number `attempt` (1-based) is permitted.
    pub fn allows(&self, attempt: u64) -> bool {
        self.0 <= 0 || attempt <= self.0 as u64
    }
}

/// Retries a push-style write up to `limit` attempts with read-shaped backoff.
///
/// Any error counts as transient here: the writer contract is only "may fail
/// transiently". Exhausting the limit maps to `RetryExhausted`, which is
/// fatal for the calling worker.
pub async fn retry_write<F, Fut>(what: &str, limit: RetryLimit, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut backoff = Backoff::read();
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        if !limit.allows(attempt) {
            return Err(CollectorError::RetryExhausted(format!(
                "{what}: gave up after {} attempts",
                attempt - 1
            )));
        }

        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    attempt,
                    retry_in = ?delay,
                    "{what} failed, backing off",
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
