// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The JSON-RPC correlation engine.
//!
//! One [`RpcSession`] represents the logical connection to the language
//! server for the life of the process, across restarts. Many callers
//! issue requests concurrently; each gets a fresh monotone id and a
//! oneshot channel, and the single reader task routes response frames
//! back by id — arrival order is irrelevant. Push notifications are
//! dispatched to registered handlers in frame-arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::error::{LspError, Result};
use crate::lsp::protocol::{
    self, NotificationMessage, RequestId, RequestMessage, ResponseError, ResponseMessage,
    ServerMessage,
};
use crate::util;

/// Default deadline for any single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, no process attached yet.
    Uninitialized,
    /// Handshake request in flight.
    Initializing,
    /// Handshake complete; requests may be issued.
    Ready,
    /// Process died; supervisor is re-spawning.
    Restarting,
    /// Restart budget exhausted. Terminal.
    Failed,
}

impl SessionState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Restarting,
            _ => Self::Failed,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initializing => 1,
            Self::Ready => 2,
            Self::Restarting => 3,
            Self::Failed => 4,
        }
    }
}

/// Handler invoked for a server push notification.
pub type NotificationHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// A request awaiting its response frame.
struct PendingRequest {
    method: String,
    sent_at: Instant,
    tx: oneshot::Sender<ResponseMessage>,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// The shared request/response correlator.
///
/// Owned by the supervisor; every other component holds an `Arc`.
pub struct RpcSession {
    next_id: AtomicI64,
    state: AtomicU8,
    transport_closed: AtomicBool,
    writer: tokio::sync::Mutex<Option<Writer>>,
    pending: std::sync::Mutex<HashMap<RequestId, PendingRequest>>,
    handlers: std::sync::Mutex<HashMap<String, NotificationHandler>>,
}

impl Default for RpcSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcSession {
    /// Creates a detached session in the `Uninitialized` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            state: AtomicU8::new(SessionState::Uninitialized.as_u8()),
            transport_closed: AtomicBool::new(true),
            writer: tokio::sync::Mutex::new(None),
            pending: std::sync::Mutex::new(HashMap::new()),
            handlers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Wires the session to a transport and starts the reader task.
    ///
    /// Called by the supervisor on every (re)spawn. Requests issued
    /// before `attach` fail with [`LspError::ConnectionClosed`].
    pub async fn attach<W, R>(self: &Arc<Self>, writer: W, reader: R)
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        *self.writer.lock().await = Some(Box::new(writer));
        self.transport_closed.store(false, Ordering::SeqCst);

        let session = Arc::clone(self);
        tokio::spawn(async move { session.read_loop(reader).await });
    }

    /// Sends a request and awaits the matching response.
    ///
    /// # Errors
    ///
    /// - [`LspError::ConnectionClosed`] if the session is not
    ///   `Ready`/`Initializing`, or the connection drops while waiting.
    /// - [`LspError::Timeout`] after [`REQUEST_TIMEOUT`].
    /// - [`LspError::Server`] for a remote error response.
    pub async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        // Initializing is allowed so the handshake itself can run.
        match self.state() {
            SessionState::Ready | SessionState::Initializing => {}
            _ => return Err(LspError::ConnectionClosed),
        }

        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();

        self.lock_pending().insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
                tx,
            },
        );

        let message = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        // Re-check after registering: if the reader exited between the
        // state check and the insert, nobody would ever drain this
        // entry, and the caller would hang until the timeout.
        if self.transport_closed.load(Ordering::SeqCst) {
            self.lock_pending().remove(&id);
            return Err(LspError::ConnectionClosed);
        }

        if let Err(err) = self.send_frame(&message).await {
            self.lock_pending().remove(&id);
            return Err(err);
        }

        let response = match util::deadline(method, REQUEST_TIMEOUT, async {
            rx.await.map_err(|_| LspError::ConnectionClosed)
        })
        .await
        {
            Ok(response) => response,
            Err(err) => {
                // On timeout the entry must go away so a late response
                // becomes an orphan frame and is discarded.
                if matches!(err, LspError::Timeout { .. }) {
                    self.lock_pending().remove(&id);
                }
                return Err(err);
            }
        };

        if let Some(error) = response.error {
            return Err(LspError::Server {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Typed wrapper over [`RpcSession::request`].
    ///
    /// # Errors
    ///
    /// As [`RpcSession::request`], plus [`LspError::Frame`] if the
    /// result does not deserialize to `R`.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::ConnectionClosed`] when no transport is
    /// attached, or a transport error from the write.
    pub async fn notify<P: serde::Serialize>(&self, method: &str, params: P) -> Result<()> {
        let message = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        self.send_frame(&message).await
    }

    /// Registers the handler for a notification method.
    ///
    /// Exactly one handler per method — registering again replaces the
    /// previous one. Handlers run on the reader task in frame-arrival
    /// order, so they must not block.
    pub fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.lock_handlers()
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Fails every pending request with a connection-closed error.
    ///
    /// Dropping the senders wakes the waiting callers; none of them
    /// hangs past the moment the crash is detected.
    pub(crate) fn fail_all_pending(&self) {
        let drained: Vec<(RequestId, PendingRequest)> =
            self.lock_pending().drain().collect();

        if !drained.is_empty() {
            warn!(
                "failing {} pending request(s): connection closed",
                drained.len()
            );
        }

        for (id, pending) in drained {
            debug!(
                "dropping pending '{}' (id {:?}, waited {:?})",
                pending.method,
                id,
                pending.sent_at.elapsed()
            );
        }
    }

    async fn send_frame<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let frame = protocol::encode_frame(message)?;

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(LspError::ConnectionClosed);
        };

        // The lock makes the whole frame one atomic write; concurrent
        // requests never interleave bytes on the wire.
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_loop<R: AsyncRead + Send + Unpin>(self: Arc<Self>, mut reader: R) {
        let mut buffer = bytes::BytesMut::with_capacity(8192);
        let mut temp = [0u8; 4096];

        'outer: loop {
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!("language server stdout closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(e) => {
                    error!("error reading from language server: {}", e);
                    break;
                }
            }

            loop {
                match protocol::try_parse_frame(&mut buffer) {
                    Ok(Some(body)) => self.dispatch(&body).await,
                    Ok(None) => continue 'outer,
                    Err(e) => warn!("skipping malformed frame: {}", e),
                }
            }
        }

        self.transport_closed.store(true, Ordering::SeqCst);
        self.fail_all_pending();
    }

    async fn dispatch(&self, body: &str) {
        trace!("received message: {}", body);

        let message = match ServerMessage::parse(body) {
            Ok(message) => message,
            Err(e) => {
                warn!("discarding undecodable message: {}", e);
                return;
            }
        };

        match message {
            ServerMessage::Response(response) => self.resolve_response(response),
            ServerMessage::Notification(notification) => {
                let handler = self
                    .lock_handlers()
                    .get(&notification.method)
                    .map(Arc::clone);

                if let Some(handler) = handler {
                    handler(notification.params);
                } else {
                    trace!("ignoring notification: {}", notification.method);
                }
            }
            ServerMessage::Request(request) => self.reject_server_request(&request).await,
        }
    }

    fn resolve_response(&self, response: ResponseMessage) {
        let Some(id) = response.id.clone() else {
            warn!("discarding response without id");
            return;
        };

        let Some(pending) = self.lock_pending().remove(&id) else {
            // Duplicate or post-timeout frame. Dropping it is the whole
            // contract: the original caller already got an answer.
            debug!("discarding response for unknown request id {:?}", id);
            return;
        };

        trace!(
            "resolved '{}' (id {:?}) after {:?}",
            pending.method,
            id,
            pending.sent_at.elapsed()
        );
        let _ = pending.tx.send(response);
    }

    /// Servers may send requests of their own (`workspace/configuration`
    /// and friends). Reply with `MethodNotFound` so they never block on
    /// us.
    async fn reject_server_request(&self, request: &RequestMessage) {
        debug!("rejecting server request: {}", request.method);

        let reply = ResponseMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(request.id.clone()),
            result: None,
            error: Some(ResponseError {
                code: -32601, // MethodNotFound
                message: format!("method '{}' not supported by client", request.method),
                data: None,
            }),
        };

        if let Err(e) = self.send_frame(&reply).await {
            warn!("failed to reject server request: {}", e);
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HashMap<String, NotificationHandler>> {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
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
    use std::sync::Mutex;

    #[tokio::test]
    async fn responses_out_of_order_reach_the_right_callers() {
        let (session, mut server) = ready_session().await;

        let s1 = session.clone();
        let first = tokio::spawn(async move {
            s1.request("test/first", serde_json::json!({})).await
        });
        let msg1 = server.next_message().await;

        let s2 = session.clone();
        let second = tokio::spawn(async move {
            s2.request("test/second", serde_json::json!({})).await
        });
        let msg2 = server.next_message().await;

        assert_eq!(msg1["method"], "test/first");
        assert_eq!(msg2["method"], "test/second");

        // Answer in reverse issuance order.
        server
            .send(&response(&msg2["id"], serde_json::json!("for-second")))
            .await;
        server
            .send(&response(&msg1["id"], serde_json::json!("for-first")))
            .await;

        assert_eq!(first.await.unwrap().unwrap(), "for-first");
        assert_eq!(second.await.unwrap().unwrap(), "for-second");
    }

    #[tokio::test]
    async fn orphan_response_is_discarded_and_reader_survives() {
        let (session, mut server) = ready_session().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ref = seen.clone();
        session.on_notification("test/ping", move |params| {
            seen_ref.lock().unwrap().push(params);
        });

        // A response nobody asked for, then a live notification.
        server
            .send(&response(&serde_json::json!(9999), serde_json::json!(null)))
            .await;
        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "test/ping",
                "params": { "n": 1 }
            }))
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 1, "reader must keep running");
    }

    #[tokio::test]
    async fn malformed_frame_does_not_kill_the_reader() {
        let (session, mut server) = ready_session().await;

        server.send_raw(b"X-Garbage: yes\r\n\r\n").await;

        let s = session.clone();
        let pending = tokio::spawn(async move {
            s.request("test/after-garbage", serde_json::json!({})).await
        });
        let msg = server.next_message().await;
        server.send(&response(&msg["id"], serde_json::json!(7))).await;

        assert_eq!(pending.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn notification_handlers_fire_in_arrival_order_and_last_wins() {
        let (session, mut server) = ready_session().await;

        let first = Arc::new(Mutex::new(Vec::new()));
        let first_ref = first.clone();
        session.on_notification("test/seq", move |params| {
            first_ref.lock().unwrap().push((1, params["n"].clone()));
        });

        // Re-registering replaces the earlier handler entirely.
        let second = Arc::new(Mutex::new(Vec::new()));
        let second_ref = second.clone();
        session.on_notification("test/seq", move |params| {
            second_ref.lock().unwrap().push((2, params["n"].clone()));
        });

        for n in 0..3 {
            server
                .send(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "test/seq",
                    "params": { "n": n }
                }))
                .await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(first.lock().unwrap().is_empty(), "replaced handler fired");
        let seen = second.lock().unwrap();
        let ns: Vec<i64> = seen.iter().map(|(_, n)| n.as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn requests_rejected_unless_ready_or_initializing() {
        let session = Arc::new(RpcSession::new());

        for state in [
            SessionState::Uninitialized,
            SessionState::Restarting,
            SessionState::Failed,
        ] {
            session.set_state(state);
            let result = session.request("test/x", serde_json::json!({})).await;
            assert!(
                matches!(result, Err(LspError::ConnectionClosed)),
                "state {state:?} must reject"
            );
        }
    }

    #[tokio::test]
    async fn remote_error_surfaces_code_and_message() {
        let (session, mut server) = ready_session().await;

        let s = session.clone();
        let pending =
            tokio::spawn(async move { s.request("test/fails", serde_json::json!({})).await });
        let msg = server.next_message().await;

        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": msg["id"],
                "error": { "code": -32603, "message": "kaboom" }
            }))
            .await;

        match pending.await.unwrap() {
            Err(LspError::Server { code, message }) => {
                assert_eq!(code, -32603);
                assert_eq!(message, "kaboom");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_loss_fails_all_pending() {
        let (session, mut server) = ready_session().await;

        let s1 = session.clone();
        let r1 = tokio::spawn(async move { s1.request("test/a", serde_json::json!({})).await });
        let s2 = session.clone();
        let r2 = tokio::spawn(async move { s2.request("test/b", serde_json::json!({})).await });

        server.next_message().await;
        server.next_message().await;
        assert_eq!(session.pending_count(), 2);

        drop(server); // server "crashes"

        assert!(matches!(r1.await.unwrap(), Err(LspError::ConnectionClosed)));
        assert!(matches!(r2.await.unwrap(), Err(LspError::ConnectionClosed)));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_pending_entry() {
        let (session, mut server) = ready_session().await;

        let s = session.clone();
        let pending =
            tokio::spawn(async move { s.request("test/slow", serde_json::json!({})).await });
        server.next_message().await; // request seen, never answered

        match pending.await.unwrap() {
            Err(LspError::Timeout { method, .. }) => assert_eq!(method, "test/slow"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn server_request_gets_method_not_found() {
        let (_session, mut server) = ready_session().await;

        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": "srv-1",
                "method": "workspace/configuration",
                "params": {}
            }))
            .await;

        let reply = server.next_message().await;
        assert_eq!(reply["id"], "srv-1");
        assert_eq!(reply["error"]["code"], -32601);
    }
}
