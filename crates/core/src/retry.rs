use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Lets the policy separate throttling from everything else. Only throttling
/// is retried; malformed responses and auth failures surface immediately.
pub trait RetryableError: fmt::Display {
    fn is_rate_limited(&self) -> bool;
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Non-rate-limit failure, surfaced on the first occurrence.
    Fatal(E),
    /// The rate limit persisted through every allowed attempt.
    Exhausted { attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Fatal(err) => write!(f, "{err}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "rate limit persisted through {attempts} attempts: {last}")
            }
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for RetryError<E> {}

/// Bounded exponential backoff around an external call. Sleeps block the
/// single worker task; acceptable for a batch job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub async fn run<T, E, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, RetryError<E>>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.base_delay;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    tracing::warn!(op, attempt, ?delay, error = %err, "rate limited; backing off");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                }
                Err(err) => return Err(RetryError::Fatal(err)),
            }
        }
    }
}
