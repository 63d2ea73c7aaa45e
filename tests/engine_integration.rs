// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! End-to-end engine tests against the bundled `mockls` server.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use gantry::{Config, Engine, LspError, ServerConfig};
use lsp_types::{DiagnosticSeverity, Position};
use tempfile::TempDir;

fn mockls_config(args: &[&str], max_restarts: u32) -> Config {
    Config {
        server: ServerConfig {
            command: env!("CARGO_BIN_EXE_mockls").to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            initialization_options: None,
        },
        max_open_documents: 100,
        max_restarts,
    }
}

fn write_fixture(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

async fn wait_for_state(engine: &Engine, state: gantry::lsp::SessionState, limit: Duration) {
    let start = Instant::now();
    while engine.state() != state {
        assert!(
            start.elapsed() < limit,
            "engine never reached {state:?}, stuck at {:?}",
            engine.state()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// After a crash the session only leaves `Ready` once the monitor task
/// observes the child exit; waiting for that transition first keeps a
/// later `Ready` wait from matching the stale pre-crash state.
async fn wait_to_leave_ready(engine: &Engine, limit: Duration) {
    let start = Instant::now();
    while engine.state() == gantry::lsp::SessionState::Ready {
        assert!(
            start.elapsed() < limit,
            "engine never left Ready after the crash"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn hover_round_trip() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "graph.txt", "alpha -> callee\n");

    let engine = Engine::start(&mockls_config(&["--no-diagnostics"], 3), dir.path())
        .await
        .unwrap();

    let hover = engine
        .hover(&file, Position::new(0, 0))
        .await
        .unwrap()
        .expect("hover content for 'alpha'");

    let rendered = serde_json::to_string(&hover).unwrap();
    assert!(rendered.contains("alpha"));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn call_hierarchy_collects_both_directions() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(
        &dir,
        "graph.txt",
        "alpha -> callee\nbeta -> callee\ncallee -> helper\n",
    );

    let engine = Engine::start(&mockls_config(&["--no-diagnostics"], 3), dir.path())
        .await
        .unwrap();

    // Position (0, 9) sits on "callee" in the first edge.
    let hierarchy = engine
        .call_hierarchy(&file, Position::new(0, 9))
        .await
        .unwrap()
        .expect("symbol at position");

    assert_eq!(hierarchy.anchor.name, "callee");
    assert_eq!(hierarchy.incoming.len(), 2);
    let mut callers: Vec<&str> = hierarchy
        .incoming
        .iter()
        .map(|call| call.from.name.as_str())
        .collect();
    callers.sort_unstable();
    assert_eq!(callers, vec!["alpha", "beta"]);

    assert_eq!(hierarchy.outgoing.len(), 1);
    assert_eq!(hierarchy.outgoing[0].to.name, "helper");

    // No symbol under an empty position.
    let nothing = engine
        .call_hierarchy(&file, Position::new(0, 5))
        .await
        .unwrap();
    assert!(nothing.is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn type_hierarchy_walks_edges_both_ways() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(
        &dir,
        "types.txt",
        "Square -> Shape\nCircle -> Shape\nShape -> Drawable\n",
    );

    let engine = Engine::start(&mockls_config(&["--no-diagnostics"], 3), dir.path())
        .await
        .unwrap();

    // Position (2, 0) sits on "Shape".
    let hierarchy = engine
        .type_hierarchy(&file, Position::new(2, 0))
        .await
        .unwrap()
        .expect("symbol at position");

    assert_eq!(hierarchy.anchor.name, "Shape");
    assert_eq!(hierarchy.incoming.len(), 1, "one supertype");
    assert_eq!(hierarchy.incoming[0].name, "Drawable");
    assert_eq!(hierarchy.outgoing.len(), 2, "two subtypes");

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn delayed_diagnostics_arrive_with_mixed_severities() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "main.c", "int main(void) { return 0; }\n");

    let engine = Engine::start(
        &mockls_config(
            &["--diagnostics-delay", "200", "--diagnostics-count", "3"],
            3,
        ),
        dir.path(),
    )
    .await
    .unwrap();

    let diagnostics = engine.get_diagnostics(&file, false).await.unwrap();
    assert_eq!(diagnostics.len(), 3);

    let count = |severity| {
        diagnostics
            .iter()
            .filter(|d| d.severity == Some(severity))
            .count()
    };
    assert_eq!(count(DiagnosticSeverity::ERROR), 1);
    assert_eq!(count(DiagnosticSeverity::WARNING), 1);
    assert_eq!(count(DiagnosticSeverity::INFORMATION), 1);
    assert_eq!(count(DiagnosticSeverity::HINT), 0);

    // Second read is a cache hit, no new wait.
    let started = Instant::now();
    let cached = engine.get_diagnostics(&file, false).await.unwrap();
    assert_eq!(cached.len(), 3);
    assert!(started.elapsed() < Duration::from_millis(100));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn crash_fails_pending_then_recovers_after_restart() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "graph.txt", "alpha -> callee\n");

    let engine = std::sync::Arc::new(
        Engine::start(
            &mockls_config(
                &[
                    "--no-diagnostics",
                    "--hang-on",
                    "textDocument/hover",
                    "--crash-on",
                    "textDocument/definition",
                ],
                3,
            ),
            dir.path(),
        )
        .await
        .unwrap(),
    );

    engine.ensure_open(&file).await.unwrap();

    // Two requests the server will never answer.
    let pending1 = {
        let engine = engine.clone();
        let file = file.clone();
        tokio::spawn(async move { engine.hover(&file, Position::new(0, 0)).await })
    };
    let pending2 = {
        let engine = engine.clone();
        let file = file.clone();
        tokio::spawn(async move { engine.hover(&file, Position::new(0, 9)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // This one kills the server with both hovers still in flight.
    let crashed = engine.definition(&file, Position::new(0, 0)).await;
    assert!(matches!(crashed, Err(LspError::ConnectionClosed)));

    assert!(matches!(
        pending1.await.unwrap(),
        Err(LspError::ConnectionClosed)
    ));
    assert!(matches!(
        pending2.await.unwrap(),
        Err(LspError::ConnectionClosed)
    ));

    wait_to_leave_ready(&engine, Duration::from_secs(5)).await;
    wait_for_state(&engine, gantry::lsp::SessionState::Ready, Duration::from_secs(10)).await;

    // The fresh process knows nothing about our documents.
    assert_eq!(engine.documents().open_count().await, 0);

    // Next use reopens and succeeds.
    let references = engine
        .references(&file, Position::new(0, 0), true)
        .await
        .unwrap();
    assert!(!references.is_empty());
    assert_eq!(engine.documents().open_count().await, 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_loop_survives_repeated_crashes() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "graph.txt", "alpha -> callee\n");

    let engine = Engine::start(
        &mockls_config(
            &["--no-diagnostics", "--crash-on", "textDocument/definition"],
            3,
        ),
        dir.path(),
    )
    .await
    .unwrap();

    // Every incarnation crashes the same way; the supervisor must come
    // back each time, not just after the first exit.
    for _ in 0..2 {
        let crashed = engine.definition(&file, Position::new(0, 0)).await;
        assert!(matches!(crashed, Err(LspError::ConnectionClosed)));

        wait_to_leave_ready(&engine, Duration::from_secs(5)).await;
        wait_for_state(&engine, gantry::lsp::SessionState::Ready, Duration::from_secs(10)).await;
    }

    let hover = engine.hover(&file, Position::new(0, 0)).await.unwrap();
    assert!(hover.is_some());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_restart_budget_is_terminal() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "graph.txt", "alpha -> callee\n");

    let engine = Engine::start(
        &mockls_config(
            &["--no-diagnostics", "--crash-on", "textDocument/hover"],
            0,
        ),
        dir.path(),
    )
    .await
    .unwrap();

    let crashed = engine.hover(&file, Position::new(0, 0)).await;
    assert!(crashed.is_err());

    wait_for_state(
        &engine,
        gantry::lsp::SessionState::Failed,
        Duration::from_secs(10),
    )
    .await;

    // Failed is terminal: everything is rejected, nothing hangs.
    let after = engine.request("shutdown", serde_json::Value::Null).await;
    assert!(matches!(after, Err(LspError::ConnectionClosed)));
}

#[tokio::test]
async fn graceful_shutdown_closes_documents() {
    let dir = TempDir::new().unwrap();
    let file = write_fixture(&dir, "graph.txt", "alpha -> callee\n");

    let engine = Engine::start(&mockls_config(&["--no-diagnostics"], 3), dir.path())
        .await
        .unwrap();

    engine.ensure_open(&file).await.unwrap();
    assert_eq!(engine.documents().open_count().await, 1);

    engine.shutdown().await.unwrap();
    assert_eq!(engine.documents().open_count().await, 0);

    let after = engine.hover(&file, Position::new(0, 0)).await;
    assert!(after.is_err(), "requests after shutdown must fail");
}
