// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Layered engine configuration.
//!
//! Sources, later overriding earlier: built-in defaults, the user
//! config file (`~/.config/gantry/config.toml`), an explicit file, and
//! `GANTRY_*` environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Engine configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// The language server to drive.
    pub server: ServerConfig,

    /// Bound on concurrently open documents (default: 100).
    #[serde(default = "default_max_open_documents")]
    pub max_open_documents: usize,

    /// Re-spawn attempts after a crash before giving up (default: 3).
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

/// How to launch the language server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "clangd")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

fn default_max_open_documents() -> usize {
    100
}

fn default_max_restarts() -> u32 {
    3
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Fails when no source provides `server.command`, or a source
    /// cannot be read or deserialized.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("max_open_documents", 100i64)?
            .set_default("max_restarts", 3i64)?;

        // 2. Load from user config directory (~/.config/gantry/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("gantry").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (GANTRY_MAX_RESTARTS, etc.)
        builder = builder.add_source(config::Environment::with_prefix("GANTRY").separator("__"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
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

    #[test]
    fn explicit_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[server]\ncommand = \"clangd\"").unwrap();

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.server.command, "clangd");
        assert!(config.server.args.is_empty());
        assert_eq!(config.max_open_documents, 100);
        assert_eq!(config.max_restarts, 3);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "max_open_documents = 4\nmax_restarts = 1\n\n\
             [server]\ncommand = \"clangd\"\nargs = [\"--background-index\"]"
        )
        .unwrap();

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.max_open_documents, 4);
        assert_eq!(config.max_restarts, 1);
        assert_eq!(config.server.args, vec!["--background-index"]);
    }

    #[test]
    fn missing_server_command_is_an_error() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "max_restarts = 2").unwrap();

        assert!(Config::load(Some(file.path().to_path_buf())).is_err());
    }
}
