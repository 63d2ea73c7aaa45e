// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Push-driven diagnostics cache with wait-for-arrival.
pub mod diagnostics;
/// Bounded LRU tracking of server-side open documents.
pub mod documents;
/// Generic two-phase call/type hierarchy queries.
pub mod hierarchy;
/// Content-Length framing and JSON-RPC message shapes.
pub mod protocol;
/// Request/response correlation and the session state machine.
pub mod session;
/// Server process spawn, handshake, and bounded auto-restart.
pub mod supervisor;

pub use diagnostics::{DIAGNOSTICS_WAIT, DiagnosticsCache};
pub use documents::{DEFAULT_CAPACITY, DocumentTracker};
pub use hierarchy::{
    CALL_HIERARCHY, HierarchyMethods, HierarchyResult, TYPE_HIERARCHY, fetch_two_phase,
};
pub use session::{REQUEST_TIMEOUT, RpcSession, SessionState};
pub use supervisor::{RESTART_BACKOFF, ServerCommand, Supervisor};

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
pub(crate) mod testing {
    //! In-process transport scripting for session-level tests.

    use std::sync::Arc;
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    use super::protocol;
    use super::session::{RpcSession, SessionState};

    /// The far end of a duplex transport: what the "server" sees.
    pub struct FakeServer {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
        buffer: BytesMut,
    }

    impl FakeServer {
        /// Reads and decodes the next frame the session wrote.
        pub async fn next_message(&mut self) -> serde_json::Value {
            let mut temp = [0u8; 4096];
            loop {
                if let Ok(Some(body)) = protocol::try_parse_frame(&mut self.buffer) {
                    return serde_json::from_str(&body).unwrap();
                }
                let n = self.reader.read(&mut temp).await.unwrap();
                assert!(n > 0, "session closed its write side unexpectedly");
                self.buffer.extend_from_slice(&temp[..n]);
            }
        }

        /// Frames and writes a message to the session.
        pub async fn send(&mut self, value: &serde_json::Value) {
            let frame = protocol::encode_frame(value).unwrap();
            self.writer.write_all(&frame).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        /// Writes raw bytes to the session, framing and all.
        pub async fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
            self.writer.flush().await.unwrap();
        }
    }

    /// A `Ready` session wired to a scripted in-process transport.
    pub async fn ready_session() -> (Arc<RpcSession>, FakeServer) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);

        let session = Arc::new(RpcSession::new());
        session.attach(near_write, near_read).await;
        session.set_state(SessionState::Ready);

        (
            session,
            FakeServer {
                reader: far_read,
                writer: far_write,
                buffer: BytesMut::new(),
            },
        )
    }

    /// A successful JSON-RPC response for `id`.
    pub fn response(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
    }
}
