//! Resilience utilities: retry with exponential backoff and bounded polling.
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use opentelemetry::{global, metrics::Counter};
use once_cell::sync::Lazy;
use rand::{thread_rng, Rng};

static RETRY_ATTEMPTS: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("attcfg-resilience")
        .u64_counter("attcfg_retry_attempts_total")
        .with_description("Total retry attempts executed")
        .build()
});

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("condition not reached within {0:?}")]
    Timeout(Duration),
    #[error("probe failed: {0}")]
    Probe(#[source] E),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64, // 0.0 - 1.0
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_retries: 3, base_delay: Duration::from_millis(100), max_delay: Duration::from_secs(5), jitter: 0.25 } }
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once.
    pub fn none() -> Self { Self { max_retries: 0, ..Self::default() } }

    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let delay = exp.min(self.max_delay);
        if self.jitter <= 0.0 { return delay; }
        let jitter_ms = (delay.as_millis() as f64 * self.jitter.min(1.0)) as i64;
        let offset: i64 = thread_rng().gen_range(-jitter_ms..=jitter_ms);
        Duration::from_millis((delay.as_millis() as i64 + offset).max(0) as u64)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the policy is exhausted.
/// `op` receives the zero-based attempt number.
pub async fn retry_async<F, Fut, T, E, R>(policy: &RetryPolicy, is_retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                if policy.max_retries > 0 { warn!(attempts = attempt + 1, error = %e, "retries exhausted"); }
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                RETRY_ATTEMPTS.add(1, &[]);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "operation failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

/// Polls `probe` every `interval` until it reports `true`, bounded by `timeout`.
/// A probe error aborts polling immediately.
pub async fn poll_until<F, Fut, E>(interval: Duration, timeout: Duration, mut probe: F) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let polling = async {
        loop {
            match probe().await {
                Ok(true) => return Ok::<(), PollError<E>>(()),
                Ok(false) => tokio::time::sleep(interval).await,
                Err(e) => return Err(PollError::Probe(e)),
            }
        }
    };
    match tokio::time::timeout(timeout, polling).await {
        Ok(res) => res,
        Err(_) => Err(PollError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy { RetryPolicy { max_retries: 3, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(10), jitter: 0.0 } }

    #[tokio::test]
    async fn retry_eventual_success() {
        let attempts = AtomicUsize::new(0);
        let res: Result<u32, &str> = retry_async(&fast(), |_| true, |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err("fail") } else { Ok(42) } }
        }).await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = AtomicUsize::new(0);
        let res: Result<(), &str> = retry_async(&fast(), |e: &&str| *e != "fatal", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        }).await;
        assert_eq!(res.unwrap_err(), "fatal");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_policy() {
        let attempts = AtomicUsize::new(0);
        let res: Result<(), &str> = retry_async(&fast(), |_| true, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("boom") }
        }).await;
        assert!(res.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy { max_retries: 10, base_delay: Duration::from_millis(100), max_delay: Duration::from_millis(250), jitter: 0.0 };
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(5), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_reaches_condition() {
        let polls = AtomicUsize::new(0);
        let res: Result<(), PollError<&str>> = poll_until(Duration::from_millis(10), Duration::from_secs(1), || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        }).await;
        assert!(res.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_times_out() {
        let res: Result<(), PollError<&str>> = poll_until(Duration::from_millis(10), Duration::from_millis(50), || async { Ok(false) }).await;
        assert!(matches!(res, Err(PollError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn poll_until_propagates_probe_error() {
        let res: Result<(), PollError<&str>> = poll_until(Duration::from_millis(1), Duration::from_secs(1), || async { Err("down") }).await;
        assert!(matches!(res, Err(PollError::Probe("down"))));
    }
}
