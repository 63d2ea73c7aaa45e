// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for the LSP session engine.
//!
//! Every failure the engine can surface falls into one of a handful of
//! classes, and callers branch on the class: transport and timeout
//! failures are retryable, remote server errors and missing files are
//! not, and a `Failed` session rejects everything with
//! [`LspError::ConnectionClosed`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, LspError>;

/// Failure classes surfaced by the session engine.
#[derive(Debug, Error)]
pub enum LspError {
    /// The server process could not be reached or written to.
    #[error("cannot reach language server: {0}")]
    Transport(String),

    /// The server answered a request with a JSON-RPC error object.
    #[error("language server error {code}: {message}")]
    Server {
        /// JSON-RPC error code from the remote response.
        code: i64,
        /// Human-readable message from the remote response.
        message: String,
    },

    /// A frame on the wire could not be decoded. Affects only that
    /// message; the reader resumes at the next frame boundary.
    #[error("malformed frame from language server: {0}")]
    Frame(String),

    /// No response arrived within the deadline.
    #[error("request '{method}' timed out after {after:?}")]
    Timeout {
        /// The method that was awaiting a response.
        method: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The session is not (or no longer) connected. Also the terminal
    /// answer once the restart budget is exhausted.
    #[error("language server connection closed")]
    ConnectionClosed,

    /// A referenced workspace file does not exist on disk.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl LspError {
    /// Whether re-attempting the whole operation can plausibly succeed.
    ///
    /// Transport-class and timeout failures qualify; remote errors,
    /// malformed frames, and missing files do not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout { .. } | Self::ConnectionClosed
        )
    }
}

impl From<std::io::Error> for LspError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LspError {
    fn from(err: serde_json::Error) -> Self {
        Self::Frame(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(LspError::Transport("broken pipe".into()).is_retryable());
        assert!(
            LspError::Timeout {
                method: "textDocument/hover".into(),
                after: Duration::from_secs(30),
            }
            .is_retryable()
        );
        assert!(LspError::ConnectionClosed.is_retryable());
    }

    #[test]
    fn remote_and_local_lookup_failures_are_not_retryable() {
        assert!(
            !LspError::Server {
                code: -32603,
                message: "internal".into(),
            }
            .is_retryable()
        );
        assert!(!LspError::NotFound(PathBuf::from("/no/such/file.c")).is_retryable());
        assert!(!LspError::Frame("bad header".into()).is_retryable());
    }

    #[test]
    fn io_errors_map_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(LspError::from(io), LspError::Transport(_)));
    }
}
