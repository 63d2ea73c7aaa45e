// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Push-driven diagnostics cache.
//!
//! Diagnostics arrive whenever the server feels like publishing them,
//! not in response to a request. The cache is written exclusively by
//! `textDocument/publishDiagnostics` pushes; readers either hit the
//! cache or park on a waiter list until the next push for that URI.
//! The wait is bounded, and on timeout the reader gets an empty list —
//! "no diagnostics yet" is an answer, not an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use lsp_types::{Diagnostic, PublishDiagnosticsParams, Uri};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::lsp::session::RpcSession;

/// Upper bound on waiting for a diagnostics push.
pub const DIAGNOSTICS_WAIT: Duration = Duration::from_secs(5);

struct Inner {
    entries: HashMap<Uri, Vec<Diagnostic>>,
    waiters: HashMap<Uri, Vec<oneshot::Sender<Vec<Diagnostic>>>>,
}

/// Latest published diagnostics per document, with wait-for-arrival.
pub struct DiagnosticsCache {
    // One lock for entries and waiters: a push between a cache miss
    // and the waiter registration must not be lost.
    inner: std::sync::Mutex<Inner>,
}

impl Default for DiagnosticsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(Inner {
                entries: HashMap::new(),
                waiters: HashMap::new(),
            }),
        }
    }

    /// Registers this cache as the session's
    /// `textDocument/publishDiagnostics` handler.
    pub fn install(self: &Arc<Self>, session: &RpcSession) {
        let cache = Arc::clone(self);
        session.on_notification("textDocument/publishDiagnostics", move |params| {
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(params) => cache.publish(params.uri, params.diagnostics),
                Err(e) => warn!("undecodable publishDiagnostics payload: {}", e),
            }
        });
    }

    /// Stores a push and resolves every waiter parked on its URI.
    pub fn publish(&self, uri: Uri, diagnostics: Vec<Diagnostic>) {
        let waiters = {
            let mut inner = self.lock();
            trace!(
                "diagnostics push for {}: {} item(s)",
                uri.as_str(),
                diagnostics.len()
            );
            inner.entries.insert(uri.clone(), diagnostics.clone());
            inner.waiters.remove(&uri).unwrap_or_default()
        };

        for waiter in waiters {
            let _ = waiter.send(diagnostics.clone());
        }
    }

    /// Diagnostics for `uri`, waiting up to [`DIAGNOSTICS_WAIT`] for a
    /// push on a cache miss. `force_refresh` discards the cached entry
    /// first, so the answer always reflects a fresh push.
    pub async fn get(&self, uri: &Uri, force_refresh: bool) -> Vec<Diagnostic> {
        self.get_with_deadline(uri, force_refresh, DIAGNOSTICS_WAIT)
            .await
    }

    /// [`DiagnosticsCache::get`] with an explicit wait bound.
    pub async fn get_with_deadline(
        &self,
        uri: &Uri,
        force_refresh: bool,
        wait: Duration,
    ) -> Vec<Diagnostic> {
        let rx = {
            let mut inner = self.lock();

            if force_refresh {
                inner.entries.remove(uri);
            } else if let Some(cached) = inner.entries.get(uri) {
                return cached.clone();
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(uri.clone()).or_default().push(tx);
            rx
        };

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(diagnostics)) => diagnostics,
            // Waiter dropped (entry cleared) or nothing arrived in
            // time: degrade to "no diagnostics".
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                debug!(
                    "no diagnostics push for {} within {:?}",
                    uri.as_str(),
                    wait
                );
                // The timed-out receiver is gone; prune its dead sender
                // so a never-published URI cannot grow the waiter list.
                let mut inner = self.lock();
                if let Some(waiters) = inner.waiters.get_mut(uri) {
                    waiters.retain(|tx| !tx.is_closed());
                    if waiters.is_empty() {
                        inner.waiters.remove(uri);
                    }
                }
                Vec::new()
            }
        }
    }

    /// Drops the entry and any parked waiters for `uri`. Wired to
    /// document closes so stale diagnostics never outlive their file.
    pub fn clear_for_file(&self, uri: &Uri) {
        let mut inner = self.lock();
        inner.entries.remove(uri);
        inner.waiters.remove(uri);
    }

    /// Number of documents with cached diagnostics.
    pub fn cached_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[cfg(test)]
    fn waiter_count(&self, uri: &Uri) -> usize {
        self.lock().waiters.get(uri).map_or(0, Vec::len)
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
    use lsp_types::{DiagnosticSeverity, Position, Range};

    fn uri(name: &str) -> Uri {
        format!("file:///tmp/{name}").parse().unwrap()
    }

    fn diagnostic(message: &str, severity: DiagnosticSeverity) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(0, 0), Position::new(0, 1)),
            severity: Some(severity),
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn push_before_get_is_an_immediate_hit() {
        let cache = DiagnosticsCache::new();
        let file = uri("hit.c");

        cache.publish(
            file.clone(),
            vec![diagnostic("bad", DiagnosticSeverity::ERROR)],
        );

        let result = cache.get(&file, false).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].message, "bad");
    }

    #[tokio::test]
    async fn get_before_push_waits_for_arrival() {
        let cache = Arc::new(DiagnosticsCache::new());
        let file = uri("late.c");

        let reader = {
            let cache = cache.clone();
            let file = file.clone();
            tokio::spawn(async move { cache.get(&file, false).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.publish(
            file,
            vec![diagnostic("arrived", DiagnosticSeverity::WARNING)],
        );

        let result = reader.await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].message, "arrived");
    }

    #[tokio::test]
    async fn one_push_resolves_every_waiter() {
        let cache = Arc::new(DiagnosticsCache::new());
        let file = uri("fanout.c");

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                let file = file.clone();
                tokio::spawn(async move { cache.get(&file, false).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.publish(file, vec![diagnostic("shared", DiagnosticSeverity::HINT)]);

        for reader in readers {
            assert_eq!(reader.await.unwrap()[0].message, "shared");
        }
    }

    #[tokio::test]
    async fn force_refresh_ignores_the_cached_entry() {
        let cache = Arc::new(DiagnosticsCache::new());
        let file = uri("stale.c");

        cache.publish(
            file.clone(),
            vec![diagnostic("stale", DiagnosticSeverity::ERROR)],
        );

        let reader = {
            let cache = cache.clone();
            let file = file.clone();
            tokio::spawn(async move { cache.get(&file, true).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.publish(
            file.clone(),
            vec![diagnostic("fresh", DiagnosticSeverity::ERROR)],
        );

        assert_eq!(reader.await.unwrap()[0].message, "fresh");
    }

    #[tokio::test]
    async fn bounded_wait_degrades_to_empty() {
        let cache = DiagnosticsCache::new();
        let result = cache
            .get_with_deadline(&uri("silent.c"), false, Duration::from_millis(30))
            .await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn timed_out_waiters_do_not_accumulate() {
        let cache = DiagnosticsCache::new();
        let file = uri("never.c");

        for _ in 0..3 {
            let result = cache
                .get_with_deadline(&file, false, Duration::from_millis(20))
                .await;
            assert!(result.is_empty());
        }

        assert_eq!(cache.waiter_count(&file), 0);
    }

    #[tokio::test]
    async fn clear_wakes_waiters_with_empty_result() {
        let cache = Arc::new(DiagnosticsCache::new());
        let file = uri("closed.c");

        let reader = {
            let cache = cache.clone();
            let file = file.clone();
            tokio::spawn(async move { cache.get(&file, false).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.clear_for_file(&file);

        assert!(reader.await.unwrap().is_empty());
        assert_eq!(cache.cached_count(), 0);
    }

    #[tokio::test]
    async fn empty_push_is_a_real_answer() {
        let cache = DiagnosticsCache::new();
        let file = uri("clean.c");

        cache.publish(file.clone(), Vec::new());
        assert!(cache.get(&file, false).await.is_empty());
        assert_eq!(cache.cached_count(), 1);
    }
}
