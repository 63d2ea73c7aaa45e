// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Language-server process supervision.
//!
//! The [`Supervisor`] spawns the server subprocess, runs the LSP
//! `initialize` handshake, and watches for unexpected exits. A crash
//! fails every in-flight request immediately, then triggers a bounded
//! number of re-spawn attempts with doubling backoff. Once the budget
//! is spent the session is `Failed` for good — no restart storms.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use lsp_types::{
    ClientCapabilities, InitializeParams, InitializeResult, InitializedParams, Uri,
    WorkspaceFolder,
};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::error::{LspError, Result};
use crate::lsp::session::{RpcSession, SessionState};

/// Base delay before the first re-spawn attempt; doubles per attempt.
pub const RESTART_BACKOFF: Duration = Duration::from_millis(500);

/// Invoked after an unexpected server exit, before restart attempts.
pub type CrashCallback = Arc<dyn Fn() + Send + Sync>;

/// How to launch the language server.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    /// Executable to spawn.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Server-specific `initializationOptions` for the handshake.
    pub initialization_options: Option<serde_json::Value>,
}

/// Owns the server subprocess lifecycle on behalf of one [`RpcSession`].
pub struct Supervisor {
    session: Arc<RpcSession>,
    command: ServerCommand,
    root: PathBuf,
    max_restarts: u32,
    stopping: AtomicBool,
    on_crash: std::sync::Mutex<Option<CrashCallback>>,
}

impl Supervisor {
    /// Spawns the server, completes the handshake, and starts the
    /// crash monitor. The session is `Ready` on return.
    ///
    /// # Errors
    ///
    /// [`LspError::Transport`] if the process cannot be spawned, or any
    /// handshake failure.
    pub async fn launch(
        command: ServerCommand,
        root: &Path,
        max_restarts: u32,
        session: Arc<RpcSession>,
    ) -> Result<Arc<Self>> {
        let supervisor = Arc::new(Self {
            session,
            command,
            root: root.to_path_buf(),
            max_restarts,
            stopping: AtomicBool::new(false),
            on_crash: std::sync::Mutex::new(None),
        });

        match supervisor.spawn_and_handshake().await {
            Ok(child) => {
                let watcher = Arc::clone(&supervisor);
                tokio::spawn(async move { watcher.monitor(child).await });
                Ok(supervisor)
            }
            Err(err) => {
                supervisor.session.set_state(SessionState::Uninitialized);
                Err(err)
            }
        }
    }

    /// The session this supervisor drives.
    #[must_use]
    pub fn session(&self) -> &Arc<RpcSession> {
        &self.session
    }

    /// Registers the observer fired on an unexpected server exit. The
    /// server's per-session state (open documents, published
    /// diagnostics) died with the process; this is where owners of
    /// mirrors of that state drop them. One slot, last wins.
    pub fn on_crash<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .on_crash
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Graceful stop: LSP `shutdown` request, `exit` notification, and
    /// no restart when the process then exits.
    ///
    /// # Errors
    ///
    /// Transport failures from the farewell messages; the restart path
    /// stays suppressed either way.
    pub async fn shutdown(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);

        // Response payload varies by server (null, true, ...); only
        // completion matters.
        let _ = self
            .session
            .request("shutdown", serde_json::Value::Null)
            .await?;
        self.session.notify("exit", serde_json::Value::Null).await?;
        self.session.set_state(SessionState::Uninitialized);

        info!("language server shut down");
        Ok(())
    }

    async fn spawn_and_handshake(&self) -> Result<Child> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LspError::Transport(format!("failed to spawn '{}': {e}", self.command.program))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Transport("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Transport("child stdout not captured".to_string()))?;

        self.session.attach(stdin, stdout).await;
        self.session.set_state(SessionState::Initializing);

        if let Err(err) = self.handshake().await {
            let _ = child.start_kill();
            return Err(err);
        }

        self.session.set_state(SessionState::Ready);
        info!("language server '{}' ready", self.command.program);
        Ok(child)
    }

    async fn handshake(&self) -> Result<()> {
        let root_uri: Uri = format!("file://{}", self.root.display())
            .parse()
            .map_err(|e| {
                LspError::Transport(format!("invalid root path {:?}: {e}", self.root))
            })?;

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            capabilities: ClientCapabilities::default(),
            initialization_options: self.command.initialization_options.clone(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: self
                    .root
                    .file_name()
                    .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string()),
            }]),
            ..Default::default()
        };

        let result: InitializeResult = self.session.call("initialize", params).await?;
        debug!(
            "server capabilities negotiated: {}",
            serde_json::to_value(&result.capabilities)
                .unwrap_or(serde_json::Value::Null)
        );

        self.session.notify("initialized", InitializedParams {}).await
    }

    // One monitor task outlives every server incarnation; a successful
    // restart re-arms the same loop with the new child.
    async fn monitor(self: Arc<Self>, mut child: Child) {
        'incarnation: loop {
            let status = child.wait().await;

            if self.stopping.load(Ordering::SeqCst) {
                debug!("language server exited after shutdown: {:?}", status);
                return;
            }

            warn!("language server exited unexpectedly: {:?}", status);

            // Callers must fail now, not after a restart attempt
            // succeeds or a 30 s timeout fires.
            self.session.set_state(SessionState::Restarting);
            self.session.fail_all_pending();

            let callback = self
                .on_crash
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            if let Some(callback) = callback {
                callback();
            }

            let mut backoff = RESTART_BACKOFF;
            for attempt in 1..=self.max_restarts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;

                info!(
                    "restarting language server (attempt {}/{})",
                    attempt, self.max_restarts
                );
                match self.spawn_and_handshake().await {
                    Ok(next) => {
                        child = next;
                        continue 'incarnation;
                    }
                    Err(e) => {
                        self.session.set_state(SessionState::Restarting);
                        warn!("restart attempt {} failed: {}", attempt, e);
                    }
                }
            }

            error!(
                "language server failed permanently after {} restart attempts",
                self.max_restarts
            );
            self.session.set_state(SessionState::Failed);
            return;
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

    fn command(program: &str, args: &[&str]) -> ServerCommand {
        ServerCommand {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            initialization_options: None,
        }
    }

    #[tokio::test]
    async fn launch_fails_fast_for_missing_executable() {
        let session = Arc::new(RpcSession::new());
        let result = Supervisor::launch(
            command("/no/such/language-server", &[]),
            Path::new("/tmp"),
            3,
            session.clone(),
        )
        .await;

        match result {
            Err(LspError::Transport(message)) => {
                assert!(message.contains("/no/such/language-server"));
            }
            Err(other) => panic!("expected transport error, got {other:?}"),
            Ok(_) => panic!("expected transport error, got a supervisor"),
        }
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn handshake_fails_when_server_exits_immediately() {
        let session = Arc::new(RpcSession::new());
        let result = Supervisor::launch(
            command("sh", &["-c", "exit 0"]),
            Path::new("/tmp"),
            0,
            session,
        )
        .await;

        // Spawn succeeds but stdout closes before any response.
        let err = result.err().unwrap();
        assert!(err.is_retryable(), "expected transport-class error, got {err:?}");
    }
}
