// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Open-document lifecycle with a bounded LRU working set.
//!
//! Most LSP requests only work on documents the server has been told
//! about, so callers funnel every path through
//! [`DocumentTracker::ensure_open`]. The tracker keeps at most
//! `capacity` documents resident; opening one more first evicts the
//! least-recently-used entry with a proper `didClose`, which keeps
//! long-running agent sessions from growing server memory without
//! bound.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use lsp_types::{
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, TextDocumentIdentifier,
    TextDocumentItem, Uri,
};
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::error::{LspError, Result};
use crate::lsp::session::RpcSession;

/// Default bound on concurrently open documents.
pub const DEFAULT_CAPACITY: usize = 100;

/// Invoked with the URI of any document the tracker closes, whether by
/// explicit close, eviction, or `close_all`.
pub type CloseCallback = Arc<dyn Fn(&Uri) + Send + Sync>;

struct OpenDocument {
    uri: Uri,
    last_accessed: Instant,
}

/// Tracks which documents the server currently has open.
pub struct DocumentTracker {
    session: Arc<RpcSession>,
    capacity: usize,
    documents: tokio::sync::Mutex<HashMap<PathBuf, OpenDocument>>,
    on_closed: std::sync::Mutex<Option<CloseCallback>>,
}

impl DocumentTracker {
    /// Creates a tracker bound to `capacity` resident documents.
    #[must_use]
    pub fn new(session: Arc<RpcSession>, capacity: usize) -> Self {
        Self {
            session,
            capacity: capacity.max(1),
            documents: tokio::sync::Mutex::new(HashMap::new()),
            on_closed: std::sync::Mutex::new(None),
        }
    }

    /// Registers the close observer. One slot; registering again
    /// replaces the previous observer.
    pub fn on_file_closed<F>(&self, callback: F)
    where
        F: Fn(&Uri) + Send + Sync + 'static,
    {
        *self.lock_callback() = Some(Arc::new(callback));
    }

    /// Makes sure the server has `path` open, returning its URI.
    ///
    /// Already-tracked documents cost a recency bump and nothing on the
    /// wire. A fresh open at capacity evicts the least-recently-used
    /// document first.
    ///
    /// # Errors
    ///
    /// [`LspError::NotFound`] if the file does not exist, or a
    /// transport failure sending `didOpen`.
    pub async fn ensure_open(&self, path: &Path) -> Result<Uri> {
        let path = path
            .canonicalize()
            .map_err(|_| LspError::NotFound(path.to_path_buf()))?;

        let mut documents = self.documents.lock().await;

        if let Some(doc) = documents.get_mut(&path) {
            doc.last_accessed = Instant::now();
            trace!("document already open: {}", path.display());
            return Ok(doc.uri.clone());
        }

        let content = fs::read_to_string(&path).await?;

        if documents.len() >= self.capacity {
            self.evict_lru(&mut documents).await;
        }

        let uri = path_to_uri(&path)?;
        let language_id = detect_language_id(&path);
        debug!("opening document: {} ({})", path.display(), language_id);

        self.session
            .notify(
                "textDocument/didOpen",
                DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri: uri.clone(),
                        language_id: language_id.to_string(),
                        version: 1,
                        text: content,
                    },
                },
            )
            .await?;

        documents.insert(
            path,
            OpenDocument {
                uri: uri.clone(),
                last_accessed: Instant::now(),
            },
        );
        Ok(uri)
    }

    /// Closes `path` if tracked. Returns whether anything was open.
    ///
    /// # Errors
    ///
    /// Transport failure sending `didClose`; the document is untracked
    /// locally regardless.
    pub async fn close_file(&self, path: &Path) -> Result<bool> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let removed = self.documents.lock().await.remove(&path);
        let Some(doc) = removed else {
            trace!("close of untracked document: {}", path.display());
            return Ok(false);
        };

        debug!("closing document: {}", path.display());
        self.announce_close(&doc.uri).await?;
        Ok(true)
    }

    /// Closes every tracked document.
    ///
    /// # Errors
    ///
    /// The first transport failure; remaining documents are still
    /// untracked locally.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<OpenDocument> = {
            let mut documents = self.documents.lock().await;
            documents.drain().map(|(_, doc)| doc).collect()
        };

        debug!("closing all {} open document(s)", drained.len());
        for doc in drained {
            self.announce_close(&doc.uri).await?;
        }
        Ok(())
    }

    /// Drops all tracking without telling the server.
    ///
    /// For after a server crash: the process's open-document state
    /// died with it, so there is nobody to send `didClose` to. The
    /// close observer still fires per document so dependent caches can
    /// invalidate.
    pub async fn forget_all(&self) {
        let drained: Vec<OpenDocument> = {
            let mut documents = self.documents.lock().await;
            documents.drain().map(|(_, doc)| doc).collect()
        };

        if !drained.is_empty() {
            debug!("forgetting {} open document(s)", drained.len());
        }

        let callback = self.lock_callback().clone();
        if let Some(callback) = callback {
            for doc in &drained {
                callback(&doc.uri);
            }
        }
    }

    /// Whether `path` is currently tracked as open.
    pub async fn is_open(&self, path: &Path) -> bool {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.documents.lock().await.contains_key(&path)
    }

    /// URIs of every open document, in no particular order.
    pub async fn open_uris(&self) -> Vec<Uri> {
        self.documents
            .lock()
            .await
            .values()
            .map(|doc| doc.uri.clone())
            .collect()
    }

    /// Number of currently open documents.
    pub async fn open_count(&self) -> usize {
        self.documents.lock().await.len()
    }

    async fn evict_lru(&self, documents: &mut HashMap<PathBuf, OpenDocument>) {
        let oldest = documents
            .iter()
            .min_by_key(|(_, doc)| doc.last_accessed)
            .map(|(path, _)| path.clone());

        let Some(path) = oldest else { return };
        let Some(doc) = documents.remove(&path) else {
            return;
        };

        debug!("evicting least-recently-used document: {}", path.display());
        // Eviction must not fail the open that triggered it.
        if let Err(e) = self.announce_close(&doc.uri).await {
            warn!("didClose for evicted document failed: {}", e);
        }
    }

    async fn announce_close(&self, uri: &Uri) -> Result<()> {
        let callback = self.lock_callback().clone();
        if let Some(callback) = callback {
            callback(uri);
        }

        self.session
            .notify(
                "textDocument/didClose",
                DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier { uri: uri.clone() },
                },
            )
            .await
    }

    fn lock_callback(&self) -> std::sync::MutexGuard<'_, Option<CloseCallback>> {
        self.on_closed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub(crate) fn path_to_uri(path: &Path) -> Result<Uri> {
    format!("file://{}", path.display())
        .parse()
        .map_err(|e| LspError::Transport(format!("invalid path for URI {}: {e}", path.display())))
}

fn detect_language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py") => "python",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("jsx") => "javascriptreact",
        Some("c") => "c",
        Some("cpp" | "cc" | "cxx" | "h" | "hpp") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("sh" | "bash" | "zsh") => "shellscript",
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        Some("toml") => "toml",
        Some("md") => "markdown",
        Some("html") => "html",
        Some("css") => "css",
        Some("lua") => "lua",
        Some("sql") => "sql",
        _ => "plaintext",
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
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    /// Session writing into a duplex pipe nobody reads. Fine for
    /// notifications as long as a test stays under the pipe buffer.
    async fn detached_session() -> Arc<RpcSession> {
        let (near, far) = tokio::io::duplex(256 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        std::mem::forget(far); // keep the pipe open for the whole test

        let session = Arc::new(RpcSession::new());
        session.attach(near_write, near_read).await;
        session
    }

    fn fixture(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[tokio::test]
    async fn second_ensure_open_is_a_cache_hit() {
        let tracker = DocumentTracker::new(detached_session().await, 10);
        let file = fixture(".c", "int main(void) { return 0; }\n");

        let first = tracker.ensure_open(file.path()).await.unwrap();
        let second = tracker.ensure_open(file.path()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(tracker.open_count().await, 1);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let tracker = DocumentTracker::new(detached_session().await, 10);

        let result = tracker.ensure_open(Path::new("/no/such/file.c")).await;
        match result {
            Err(LspError::NotFound(path)) => {
                assert_eq!(path, PathBuf::from("/no/such/file.c"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eviction_picks_least_recently_used() {
        let tracker = DocumentTracker::new(detached_session().await, 2);

        let closed = Arc::new(Mutex::new(Vec::new()));
        let closed_ref = closed.clone();
        tracker.on_file_closed(move |uri| {
            closed_ref.lock().unwrap().push(uri.clone());
        });

        let a = fixture(".c", "int a;\n");
        let b = fixture(".c", "int b;\n");
        let c = fixture(".c", "int c;\n");

        tracker.ensure_open(a.path()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.ensure_open(b.path()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touch `a` so `b` becomes the LRU candidate.
        tracker.ensure_open(a.path()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.ensure_open(c.path()).await.unwrap();

        assert_eq!(tracker.open_count().await, 2);
        assert!(tracker.is_open(a.path()).await);
        assert!(!tracker.is_open(b.path()).await);
        assert!(tracker.is_open(c.path()).await);

        let closed = closed.lock().unwrap();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].as_str().ends_with(
            b.path().canonicalize().unwrap().to_str().unwrap()
        ));
    }

    #[tokio::test]
    async fn close_file_reports_whether_anything_was_open() {
        let tracker = DocumentTracker::new(detached_session().await, 10);
        let file = fixture(".c", "int x;\n");

        assert!(!tracker.close_file(file.path()).await.unwrap());

        tracker.ensure_open(file.path()).await.unwrap();
        assert!(tracker.close_file(file.path()).await.unwrap());
        assert!(!tracker.is_open(file.path()).await);
    }

    #[tokio::test]
    async fn close_all_fires_callback_per_document() {
        let tracker = DocumentTracker::new(detached_session().await, 10);

        let count = Arc::new(Mutex::new(0));
        let count_ref = count.clone();
        tracker.on_file_closed(move |_| {
            *count_ref.lock().unwrap() += 1;
        });

        let a = fixture(".c", "int a;\n");
        let b = fixture(".h", "extern int a;\n");
        tracker.ensure_open(a.path()).await.unwrap();
        tracker.ensure_open(b.path()).await.unwrap();

        tracker.close_all().await.unwrap();
        assert_eq!(tracker.open_count().await, 0);
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn later_close_callback_replaces_earlier() {
        let tracker = DocumentTracker::new(detached_session().await, 10);

        let first = Arc::new(Mutex::new(0));
        let first_ref = first.clone();
        tracker.on_file_closed(move |_| *first_ref.lock().unwrap() += 1);

        let second = Arc::new(Mutex::new(0));
        let second_ref = second.clone();
        tracker.on_file_closed(move |_| *second_ref.lock().unwrap() += 1);

        let file = fixture(".c", "int x;\n");
        tracker.ensure_open(file.path()).await.unwrap();
        tracker.close_file(file.path()).await.unwrap();

        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn forget_all_drops_tracking_and_fires_callback() {
        let tracker = DocumentTracker::new(detached_session().await, 10);

        let count = Arc::new(Mutex::new(0));
        let count_ref = count.clone();
        tracker.on_file_closed(move |_| *count_ref.lock().unwrap() += 1);

        let a = fixture(".c", "int a;\n");
        let b = fixture(".c", "int b;\n");
        tracker.ensure_open(a.path()).await.unwrap();
        tracker.ensure_open(b.path()).await.unwrap();

        tracker.forget_all().await;

        assert_eq!(tracker.open_count().await, 0);
        assert_eq!(*count.lock().unwrap(), 2);
        // Reopening after a forget is a fresh open, not a cache hit.
        tracker.ensure_open(a.path()).await.unwrap();
        assert_eq!(tracker.open_count().await, 1);
    }

    #[test]
    fn language_ids_cover_c_and_cpp_families() {
        assert_eq!(detect_language_id(Path::new("x.c")), "c");
        for ext in ["cpp", "cc", "cxx", "h", "hpp"] {
            assert_eq!(detect_language_id(Path::new(&format!("x.{ext}"))), "cpp");
        }
        assert_eq!(detect_language_id(Path::new("x.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("x.weird")), "plaintext");
    }
}
