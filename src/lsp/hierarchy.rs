// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Generic two-phase hierarchy queries.
//!
//! Call hierarchy and type hierarchy share one protocol shape: a
//! `prepare` request resolves the symbol under a position into items,
//! then each item can be expanded in two directions. The fetcher
//! implements the shape once; the method-name triples pick the
//! concrete protocol.

use lsp_types::{Position, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lsp::session::RpcSession;

/// The three method names of one hierarchy protocol.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyMethods {
    /// Position → items resolution.
    pub prepare: &'static str,
    /// First expansion direction (callers / supertypes).
    pub incoming: &'static str,
    /// Second expansion direction (callees / subtypes).
    pub outgoing: &'static str,
}

/// Method triple for call hierarchy.
pub const CALL_HIERARCHY: HierarchyMethods = HierarchyMethods {
    prepare: "textDocument/prepareCallHierarchy",
    incoming: "callHierarchy/incomingCalls",
    outgoing: "callHierarchy/outgoingCalls",
};

/// Method triple for type hierarchy.
pub const TYPE_HIERARCHY: HierarchyMethods = HierarchyMethods {
    prepare: "textDocument/prepareTypeHierarchy",
    incoming: "typeHierarchy/supertypes",
    outgoing: "typeHierarchy/subtypes",
};

/// Anchor item plus both expansion directions.
#[derive(Debug, Clone)]
pub struct HierarchyResult<I, In, Out> {
    /// The prepared item the expansions are anchored on.
    pub anchor: I,
    /// Results of the `incoming` expansion.
    pub incoming: Vec<In>,
    /// Results of the `outgoing` expansion.
    pub outgoing: Vec<Out>,
}

/// Runs prepare, anchors on the first item, and expands both
/// directions concurrently.
///
/// No symbol at the position (`null` or empty prepare result) is
/// `Ok(None)`. A failed expansion degrades to an empty collection for
/// that side only; partial data beats none.
///
/// # Errors
///
/// Prepare-phase failures (transport, timeout, remote error) surface
/// unchanged.
pub async fn fetch_two_phase<I, In, Out>(
    session: &RpcSession,
    methods: &HierarchyMethods,
    uri: &Uri,
    position: Position,
) -> Result<Option<HierarchyResult<I, In, Out>>>
where
    I: Serialize + DeserializeOwned,
    In: DeserializeOwned,
    Out: DeserializeOwned,
{
    let prepare_params = serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position,
    });

    let items: Option<Vec<I>> = session.call(methods.prepare, prepare_params).await?;
    let Some(mut items) = items.filter(|items| !items.is_empty()) else {
        debug!("{}: no symbol at {:?}", methods.prepare, position);
        return Ok(None);
    };

    // Servers may return several items for ambiguous positions; the
    // first is the primary symbol.
    let anchor = items.swap_remove(0);
    let item_params = serde_json::json!({ "item": &anchor });

    let (incoming, outgoing) = tokio::join!(
        session.call::<_, Option<Vec<In>>>(methods.incoming, item_params.clone()),
        session.call::<_, Option<Vec<Out>>>(methods.outgoing, item_params.clone()),
    );

    Ok(Some(HierarchyResult {
        anchor,
        incoming: collect_side(methods.incoming, incoming),
        outgoing: collect_side(methods.outgoing, outgoing),
    }))
}

fn collect_side<T>(method: &str, result: Result<Option<Vec<T>>>) -> Vec<T> {
    match result {
        Ok(Some(items)) => items,
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("{} failed, degrading to empty: {}", method, e);
            Vec::new()
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
    use crate::lsp::testing::{ready_session, response};
    use serde_json::{Value, json};

    fn file_uri() -> Uri {
        "file:///tmp/project/main.c".parse().unwrap()
    }

    #[tokio::test]
    async fn null_prepare_result_means_no_symbol() {
        let (session, mut server) = ready_session().await;

        let task = tokio::spawn(async move {
            fetch_two_phase::<Value, Value, Value>(
                &session,
                &CALL_HIERARCHY,
                &file_uri(),
                Position::new(3, 7),
            )
            .await
        });

        let prepare = server.next_message().await;
        assert_eq!(prepare["method"], "textDocument/prepareCallHierarchy");
        server.send(&response(&prepare["id"], Value::Null)).await;

        assert!(task.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_prepare_result_means_no_symbol() {
        let (session, mut server) = ready_session().await;

        let task = tokio::spawn(async move {
            fetch_two_phase::<Value, Value, Value>(
                &session,
                &TYPE_HIERARCHY,
                &file_uri(),
                Position::new(0, 0),
            )
            .await
        });

        let prepare = server.next_message().await;
        assert_eq!(prepare["method"], "textDocument/prepareTypeHierarchy");
        server.send(&response(&prepare["id"], json!([]))).await;

        assert!(task.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn expands_both_directions_from_the_first_item() {
        let (session, mut server) = ready_session().await;

        let task = tokio::spawn(async move {
            fetch_two_phase::<Value, Value, Value>(
                &session,
                &CALL_HIERARCHY,
                &file_uri(),
                Position::new(10, 4),
            )
            .await
        });

        let prepare = server.next_message().await;
        server
            .send(&response(
                &prepare["id"],
                json!([{ "name": "anchor" }, { "name": "secondary" }]),
            ))
            .await;

        // Both expansions are in flight concurrently.
        let first = server.next_message().await;
        let second = server.next_message().await;
        let by_method = |method: &str| {
            [&first, &second]
                .into_iter()
                .find(|m| m["method"] == method)
                .unwrap()
                .clone()
        };

        let incoming = by_method("callHierarchy/incomingCalls");
        assert_eq!(incoming["params"]["item"]["name"], "anchor");
        server
            .send(&response(
                &incoming["id"],
                json!([{ "from": "a" }, { "from": "b" }]),
            ))
            .await;

        let outgoing = by_method("callHierarchy/outgoingCalls");
        server
            .send(&response(&outgoing["id"], json!([{ "to": "c" }])))
            .await;

        let result = task.await.unwrap().unwrap().unwrap();
        assert_eq!(result.anchor["name"], "anchor");
        assert_eq!(result.incoming.len(), 2);
        assert_eq!(result.outgoing.len(), 1);
    }

    #[tokio::test]
    async fn failed_expansion_degrades_to_empty_side() {
        let (session, mut server) = ready_session().await;

        let task = tokio::spawn(async move {
            fetch_two_phase::<Value, Value, Value>(
                &session,
                &CALL_HIERARCHY,
                &file_uri(),
                Position::new(1, 1),
            )
            .await
        });

        let prepare = server.next_message().await;
        server
            .send(&response(&prepare["id"], json!([{ "name": "anchor" }])))
            .await;

        let first = server.next_message().await;
        let second = server.next_message().await;
        for message in [&first, &second] {
            if message["method"] == "callHierarchy/incomingCalls" {
                server
                    .send(&serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": message["id"],
                        "error": { "code": -32603, "message": "exploded" }
                    }))
                    .await;
            } else {
                server
                    .send(&response(&message["id"], json!([{ "to": "x" }])))
                    .await;
            }
        }

        let result = task.await.unwrap().unwrap().unwrap();
        assert!(result.incoming.is_empty(), "failed side degrades to empty");
        assert_eq!(result.outgoing.len(), 1, "healthy side keeps its data");
    }

    #[tokio::test]
    async fn prepare_failure_surfaces_unchanged() {
        let (session, mut server) = ready_session().await;

        let task = tokio::spawn(async move {
            fetch_two_phase::<Value, Value, Value>(
                &session,
                &TYPE_HIERARCHY,
                &file_uri(),
                Position::new(2, 2),
            )
            .await
        });

        let prepare = server.next_message().await;
        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": prepare["id"],
                "error": { "code": -32601, "message": "not supported" }
            }))
            .await;

        assert!(matches!(
            task.await.unwrap(),
            Err(crate::error::LspError::Server { code: -32601, .. })
        ));
    }
}
