// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Content-Length framing and JSON-RPC message shapes.
//!
//! The wire format is the LSP base protocol: a header block terminated
//! by `\r\n\r\n`, of which only `Content-Length` matters, followed by
//! exactly that many bytes of JSON. A malformed frame poisons only
//! itself — the reader reports it and resumes at the next boundary.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{LspError, Result};

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// JSON-RPC request identifier. The engine only ever allocates numeric
/// ids, but servers may echo string ids on their own requests.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// An outbound (or server-initiated) request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation identifier.
    pub id: RequestId,
    /// Method name, e.g. `textDocument/hover`.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A response correlated to an earlier request by id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Identifier of the request being answered.
    pub id: Option<RequestId>,
    /// Success payload. `null` results deserialize to `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error payload, mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// The error object of a failed response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A fire-and-forget notification (either direction).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Method name, e.g. `textDocument/publishDiagnostics`.
    pub method: String,
    /// Notification parameters.
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// An inbound message classified by shape.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Response to one of our requests (`id`, no `method`).
    Response(ResponseMessage),
    /// Server push not correlated to any request (`method`, no `id`).
    Notification(NotificationMessage),
    /// Server-initiated request (`method` and `id`), e.g.
    /// `workspace/configuration`.
    Request(RequestMessage),
}

impl ServerMessage {
    /// Classifies and parses one frame body.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Frame`] when the body is not valid JSON or
    /// matches none of the three JSON-RPC shapes.
    pub fn parse(body: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(body)?;

        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();

        match (has_method, has_id) {
            (true, true) => Ok(Self::Request(serde_json::from_value(value)?)),
            (true, false) => Ok(Self::Notification(serde_json::from_value(value)?)),
            (false, true) => Ok(Self::Response(serde_json::from_value(value)?)),
            (false, false) => Err(LspError::Frame(format!(
                "message is neither request, response, nor notification: {body}"
            ))),
        }
    }
}

/// Serializes a message and prepends the `Content-Length` header.
///
/// # Errors
///
/// Returns [`LspError::Frame`] if the message cannot be serialized.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_string(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

/// Extracts the next complete frame body from `buffer`, if any.
///
/// Returns `Ok(None)` when the buffer holds no complete frame yet.
/// A header block with no parsable `Content-Length`, or a body that is
/// not UTF-8, is consumed and reported as [`LspError::Frame`]; the next
/// call resumes at the following frame boundary.
///
/// # Errors
///
/// Returns [`LspError::Frame`] for a malformed header or body.
pub fn try_parse_frame(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(headers_end) = find_headers_end(buffer) else {
        return Ok(None);
    };

    let content_length = match parse_content_length(&buffer[..headers_end - 4]) {
        Ok(len) => len,
        Err(err) => {
            // Discard the bad header block so reading can resume at
            // whatever follows it.
            buffer.advance(headers_end);
            return Err(err);
        }
    };

    let Some(total) = headers_end.checked_add(content_length) else {
        buffer.advance(headers_end);
        return Err(LspError::Frame(format!(
            "Content-Length {content_length} overflows the frame size"
        )));
    };
    if buffer.len() < total {
        return Ok(None);
    }

    buffer.advance(headers_end);
    let body_bytes = buffer.split_to(content_length);
    String::from_utf8(body_bytes.to_vec())
        .map(Some)
        .map_err(|e| LspError::Frame(format!("frame body is not UTF-8: {e}")))
}

/// Position just past the `\r\n\r\n` terminator, if present.
fn find_headers_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

fn parse_content_length(headers: &[u8]) -> Result<usize> {
    let headers_str = std::str::from_utf8(headers)
        .map_err(|e| LspError::Frame(format!("header block is not UTF-8: {e}")))?;

    for line in headers_str.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            return value
                .trim()
                .parse()
                .map_err(|e| LspError::Frame(format!("bad Content-Length '{value}': {e}")));
        }
    }

    Err(LspError::Frame(format!(
        "no Content-Length header in: {headers_str}"
    )))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;

    fn frame(body: &str) -> BytesMut {
        BytesMut::from(format!("Content-Length: {}\r\n\r\n{body}", body.len()).as_str())
    }

    #[test]
    fn parses_complete_frame() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let mut buffer = frame(body);

        let result = try_parse_frame(&mut buffer).unwrap();
        assert_eq!(result, Some(body.to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn incomplete_header_yields_none() {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        assert_eq!(try_parse_frame(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), 20, "partial header must stay buffered");
    }

    #[test]
    fn incomplete_body_yields_none() {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        assert_eq!(try_parse_frame(&mut buffer).unwrap(), None);
    }

    #[test]
    fn parses_back_to_back_frames() {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let mut buffer = frame(body1);
        buffer.extend_from_slice(&frame(body2));

        assert_eq!(try_parse_frame(&mut buffer).unwrap(), Some(body1.into()));
        assert_eq!(try_parse_frame(&mut buffer).unwrap(), Some(body2.into()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut buffer = BytesMut::from(raw.as_str());

        assert_eq!(try_parse_frame(&mut buffer).unwrap(), Some(body.into()));
    }

    #[test]
    fn malformed_header_is_skipped_and_reading_resumes() {
        let good = r#"{"jsonrpc":"2.0","id":7}"#;
        let mut buffer = BytesMut::from("X-Nonsense: yes\r\n\r\n");
        buffer.extend_from_slice(&frame(good));

        assert!(matches!(
            try_parse_frame(&mut buffer),
            Err(LspError::Frame(_))
        ));
        // Next call picks up the following well-formed frame.
        assert_eq!(try_parse_frame(&mut buffer).unwrap(), Some(good.into()));
    }

    #[test]
    fn absurd_content_length_is_a_frame_error_not_a_panic() {
        let mut buffer = BytesMut::from("Content-Length: 18446744073709551615\r\n\r\n");
        assert!(matches!(
            try_parse_frame(&mut buffer),
            Err(LspError::Frame(_))
        ));
        assert!(buffer.is_empty(), "overflowing header must be consumed");
    }

    #[test]
    fn unparsable_content_length_is_a_frame_error() {
        let mut buffer = BytesMut::from("Content-Length: banana\r\n\r\n");
        assert!(matches!(
            try_parse_frame(&mut buffer),
            Err(LspError::Frame(_))
        ));
    }

    #[test]
    fn encode_round_trips_through_parse() {
        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: "initialized".to_string(),
            params: serde_json::json!({}),
        };

        let bytes = encode_frame(&notification).unwrap();
        let mut buffer = BytesMut::from(bytes.as_slice());
        let body = try_parse_frame(&mut buffer).unwrap().unwrap();

        match ServerMessage::parse(&body).unwrap() {
            ServerMessage::Notification(n) => assert_eq!(n.method, "initialized"),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn classifies_response_with_numeric_and_string_ids() {
        let numeric = r#"{"jsonrpc":"2.0","id":42,"result":{"capabilities":{}}}"#;
        match ServerMessage::parse(numeric).unwrap() {
            ServerMessage::Response(r) => {
                assert_eq!(r.id, Some(RequestId::Number(42)));
                assert!(r.result.is_some());
            }
            other => panic!("expected response, got {other:?}"),
        }

        let string = r#"{"jsonrpc":"2.0","id":"abc-123","result":null}"#;
        match ServerMessage::parse(string).unwrap() {
            ServerMessage::Response(r) => {
                assert_eq!(r.id, Some(RequestId::String("abc-123".into())));
                // null deserializes to None for Option<Value>
                assert!(r.result.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn classifies_error_response() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        match ServerMessage::parse(body).unwrap() {
            ServerMessage::Response(r) => {
                let error = r.error.unwrap();
                assert_eq!(error.code, -32600);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn classifies_server_request() {
        let body = r#"{"jsonrpc":"2.0","id":9,"method":"workspace/configuration","params":{}}"#;
        match ServerMessage::parse(body).unwrap() {
            ServerMessage::Request(r) => {
                assert_eq!(r.method, "workspace/configuration");
                assert_eq!(r.id, RequestId::Number(9));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn shapeless_message_is_a_frame_error() {
        assert!(matches!(
            ServerMessage::parse(r#"{"jsonrpc":"2.0"}"#),
            Err(LspError::Frame(_))
        ));
    }
}
