// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Gantry is a crash-resilient session engine for driving a Language
//! Server Protocol subprocess over framed stdio.
//!
//! It multiplexes concurrent logical requests onto one JSON-RPC
//! connection, supervises the server process with bounded auto-restart,
//! keeps the set of open documents within an LRU bound, caches
//! push-driven diagnostics with wait-for-arrival semantics, and
//! answers the two-phase call/type hierarchy queries. Tool bridges for
//! AI coding assistants build their request/response surface on top of
//! an [`Engine`].
//!
//! Every request is raced against a deadline internally; re-issuing a
//! failed operation is left to the bridge layer via [`util::retry`],
//! since only the caller knows which of its operations are safe to
//! repeat.

/// Configuration handling for the server command and engine limits.
pub mod config;
/// Error taxonomy shared across the engine.
pub mod error;
/// LSP transport, correlation, supervision, and caches.
pub mod lsp;
/// Deadline and retry combinators.
pub mod util;

use std::path::Path;
use std::sync::Arc;
use lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, Diagnostic,
    GotoDefinitionResponse, Hover, Location, Position, TypeHierarchyItem, Uri,
};
use tracing::info;

pub use config::{Config, ServerConfig};
pub use error::{LspError, Result};
use lsp::hierarchy::{self, HierarchyResult};
use lsp::{
    CALL_HIERARCHY, DiagnosticsCache, DocumentTracker, RpcSession, ServerCommand, SessionState,
    Supervisor, TYPE_HIERARCHY,
};

/// A complete call-hierarchy answer for one position.
pub type CallHierarchy =
    HierarchyResult<CallHierarchyItem, CallHierarchyIncomingCall, CallHierarchyOutgoingCall>;

/// A complete type-hierarchy answer for one position.
pub type TypeHierarchy = HierarchyResult<TypeHierarchyItem, TypeHierarchyItem, TypeHierarchyItem>;

/// The assembled session engine: one language server, one session.
///
/// All collaborators are wired at [`Engine::start`]; there is no
/// global state, and dropping the engine kills the subprocess.
pub struct Engine {
    session: Arc<RpcSession>,
    supervisor: Arc<Supervisor>,
    documents: Arc<DocumentTracker>,
    diagnostics: Arc<DiagnosticsCache>,
}

impl Engine {
    /// Spawns the configured server for `root` and wires the engine.
    ///
    /// # Errors
    ///
    /// [`LspError::Transport`] when the server cannot be spawned or
    /// the handshake fails.
    pub async fn start(config: &Config, root: &Path) -> Result<Self> {
        let session = Arc::new(RpcSession::new());

        let diagnostics = Arc::new(DiagnosticsCache::new());
        diagnostics.install(&session);

        let supervisor = Supervisor::launch(
            ServerCommand {
                program: config.server.command.clone(),
                args: config.server.args.clone(),
                initialization_options: config.server.initialization_options.clone(),
            },
            root,
            config.max_restarts,
            Arc::clone(&session),
        )
        .await?;

        let documents = Arc::new(DocumentTracker::new(
            Arc::clone(&session),
            config.max_open_documents,
        ));

        // Closed documents must not serve stale diagnostics.
        let cache = Arc::clone(&diagnostics);
        documents.on_file_closed(move |uri| cache.clear_for_file(uri));

        // A crashed server forgot its open documents; so must we.
        // Callers re-ensure_open on next use.
        let tracker = Arc::clone(&documents);
        supervisor.on_crash(move || {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.forget_all().await });
        });

        info!(
            "engine started: {} (root {})",
            config.server.command,
            root.display()
        );

        Ok(Self {
            session,
            supervisor,
            documents,
            diagnostics,
        })
    }

    /// Current session lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The open-document tracker.
    #[must_use]
    pub fn documents(&self) -> &Arc<DocumentTracker> {
        &self.documents
    }

    /// The diagnostics cache.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticsCache> {
        &self.diagnostics
    }

    /// Makes sure `path` is open on the server, returning its URI.
    ///
    /// # Errors
    ///
    /// See [`DocumentTracker::ensure_open`].
    pub async fn ensure_open(&self, path: &Path) -> Result<Uri> {
        self.documents.ensure_open(path).await
    }

    /// Diagnostics for `path`, waiting briefly for a push on a miss.
    ///
    /// # Errors
    ///
    /// [`LspError::NotFound`] if the file does not exist; the wait
    /// itself never fails, degrading to an empty list instead.
    pub async fn get_diagnostics(
        &self,
        path: &Path,
        force_refresh: bool,
    ) -> Result<Vec<Diagnostic>> {
        let uri = self.ensure_open(path).await?;
        Ok(self.diagnostics.get(&uri, force_refresh).await)
    }

    /// Full call hierarchy (anchor, callers, callees) at a position.
    ///
    /// # Errors
    ///
    /// Open or prepare-phase failures; expansion failures degrade.
    pub async fn call_hierarchy(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<CallHierarchy>> {
        let uri = self.ensure_open(path).await?;
        hierarchy::fetch_two_phase(&self.session, &CALL_HIERARCHY, &uri, position).await
    }

    /// Full type hierarchy (anchor, supertypes, subtypes) at a position.
    ///
    /// # Errors
    ///
    /// Open or prepare-phase failures; expansion failures degrade.
    pub async fn type_hierarchy(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<TypeHierarchy>> {
        let uri = self.ensure_open(path).await?;
        hierarchy::fetch_two_phase(&self.session, &TYPE_HIERARCHY, &uri, position).await
    }

    /// Hover information at a position.
    ///
    /// # Errors
    ///
    /// Open, transport, timeout, or remote failures.
    pub async fn hover(&self, path: &Path, position: Position) -> Result<Option<Hover>> {
        let uri = self.ensure_open(path).await?;
        self.session
            .call("textDocument/hover", position_params(&uri, position))
            .await
    }

    /// Definition location(s) for the symbol at a position.
    ///
    /// # Errors
    ///
    /// Open, transport, timeout, or remote failures.
    pub async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = self.ensure_open(path).await?;
        self.session
            .call("textDocument/definition", position_params(&uri, position))
            .await
    }

    /// All references to the symbol at a position.
    ///
    /// # Errors
    ///
    /// Open, transport, timeout, or remote failures.
    pub async fn references(
        &self,
        path: &Path,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        let uri = self.ensure_open(path).await?;
        let mut params = position_params(&uri, position);
        params["context"] = serde_json::json!({ "includeDeclaration": include_declaration });

        let locations: Option<Vec<Location>> =
            self.session.call("textDocument/references", params).await?;
        Ok(locations.unwrap_or_default())
    }

    /// Raw request passthrough for methods without a typed helper.
    ///
    /// # Errors
    ///
    /// Transport, timeout, or remote failures.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.session.request(method, params).await
    }

    /// Registers the observer fired whenever a document is closed
    /// (explicitly, by eviction, or during shutdown). One slot; the
    /// latest registration wins. The engine's own diagnostics-clearing
    /// hook runs regardless.
    pub fn on_file_closed<F>(&self, callback: F)
    where
        F: Fn(&Uri) + Send + Sync + 'static,
    {
        let cache = Arc::clone(&self.diagnostics);
        self.documents.on_file_closed(move |uri| {
            cache.clear_for_file(uri);
            callback(uri);
        });
    }

    /// Closes every document and stops the server gracefully.
    ///
    /// # Errors
    ///
    /// Transport failures from the farewell messages; the process is
    /// reaped either way.
    pub async fn shutdown(&self) -> Result<()> {
        self.documents.close_all().await?;
        self.supervisor.shutdown().await
    }
}

fn position_params(uri: &Uri, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position,
    })
}
