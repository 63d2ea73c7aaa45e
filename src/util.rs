// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Generic deadline and retry combinators.
//!
//! Every outward-facing operation in the engine is raced against a
//! deadline so a wedged server never hangs a caller. [`retry`] is the
//! matching policy knob for bridge callers: the engine never re-issues
//! a request on its own, because only the caller knows which of its
//! operations are idempotent. Both combinators are deliberately dumb:
//! classification lives in [`LspError::is_retryable`], not here.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{LspError, Result};

/// Races `fut` against `after`, converting elapsed time into a
/// distinguishable [`LspError::Timeout`] carrying the method name.
///
/// # Errors
///
/// Returns the future's own error, or `LspError::Timeout` when the
/// deadline elapses first.
pub async fn deadline<T, F>(method: &str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(LspError::Timeout {
            method: method.to_string(),
            after,
        }),
    }
}

/// Re-runs `op` from scratch on retryable failures, up to `attempts`
/// total tries, sleeping `base_backoff` doubled after each failure.
///
/// Non-retryable errors (remote errors, missing files, malformed
/// frames) surface immediately — only transport/timeout-class failures
/// qualify, and an empty/"not found" success is a success.
///
/// # Errors
///
/// Returns the last error once the attempt budget is spent, or the
/// first non-retryable error encountered.
pub async fn retry<T, F, Fut>(attempts: u32, base_backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base_backoff;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    "attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn deadline_passes_through_fast_results() {
        let result = deadline("test/fast", Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_timeouts_with_method() {
        let result: Result<()> = deadline("test/slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        match result {
            Err(LspError::Timeout { method, after }) => {
                assert_eq!(method, "test/slow");
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_retries_transport_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result = retry(3, Duration::from_millis(10), move || {
            let calls = calls_ref.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LspError::Transport("flaky".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_surfaces_remote_errors_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<()> = retry(3, Duration::from_millis(10), move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LspError::Server {
                    code: -32600,
                    message: "invalid request".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(LspError::Server { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry on remote error");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<()> = retry(3, Duration::from_millis(10), move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LspError::ConnectionClosed)
            }
        })
        .await;

        assert!(matches!(result, Err(LspError::ConnectionClosed)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
