//! Bounded retry with exponential backoff.
//!
//! External calls fail transiently and frequently under concurrent load
//! (429s, 503s, timeouts). Both call sites — enrichment and retrieval —
//! share the same policy, so it lives here as a small combinator instead of
//! a retry loop duplicated inside each worker. The combinator returns an
//! explicit outcome rather than an `Err`, because an exhausted retry budget
//! is an expected, tolerated event: the caller degrades (skips enrichment,
//! emits a fallback prediction) instead of propagating.

use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Result of running an operation under a bounded retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded, possibly after retries.
    Success {
        value: T,
        /// Number of retries consumed (0 = first attempt succeeded).
        retries: u32,
    },
    /// Every attempt failed; carries the last error seen.
    Exhausted { last_error: E },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }
}

/// Run `op` up to `1 + max_retries` times with exponential backoff.
///
/// The wait before retry `n` (1-based) is `backoff_ms * 2^(n-1)`: with the
/// default 500 ms base and 3 retries the sequence is 500 ms, 1 s, 2 s.
/// `label` identifies the unit in the warning logs.
pub async fn with_retries<T, E, F, Fut>(
    label: &str,
    max_retries: u32,
    backoff_ms: u64,
    mut op: F,
) -> RetryOutcome<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error: Option<E> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms * 2u64.pow(attempt - 1);
            warn!("{label}: retry {attempt}/{max_retries} after {backoff}ms");
            sleep(Duration::from_millis(backoff)).await;
        }

        match op().await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    retries: attempt,
                }
            }
            Err(e) => {
                warn!("{label}: attempt {} failed: {e}", attempt + 1);
                last_error = Some(e);
            }
        }
    }

    RetryOutcome::Exhausted {
        // max_retries >= 0 means at least one attempt ran, so an error exists
        last_error: last_error.expect("at least one attempt"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn first_attempt_success_uses_no_retries() {
        let outcome: RetryOutcome<u32, String> =
            with_retries("t", 3, 1, || async { Ok(7) }).await;
        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: 7,
                retries: 0
            }
        );
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = with_retries("t", 3, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: "done",
                retries: 2
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_carries_last_error() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), String> = with_retries("t", 2, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("error {n}")) }
        })
        .await;
        match outcome {
            RetryOutcome::Exhausted { last_error } => assert_eq!(last_error, "error 2"),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        // 1 initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicU32::new(0);
        let _: RetryOutcome<(), &str> = with_retries("t", 0, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
