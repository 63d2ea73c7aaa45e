// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. CLI flags control diagnostics timing, and failure modes.
//! Hierarchy queries are served from an `a -> b` edge-list document
//! syntax so fixtures stay deterministic. No tokio — uses `std::thread`
//! for deferred notifications.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Diagnostics per publish; severities cycle error/warning/info.
    #[arg(long, default_value_t = 1)]
    diagnostics_count: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Exit with status 1 after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Exit with status 1 upon receiving this method, leaving its
    /// request (and anything hung) unanswered (repeatable).
    #[arg(long)]
    crash_on: Vec<String>,

    /// Send workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
    shutdown_flag: Arc<AtomicBool>,
    next_request_id: Arc<AtomicU64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }

            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        let Some(method) = request.method.clone() else {
            return;
        };

        if self.args.crash_on.iter().any(|m| m == &method) {
            std::process::exit(1);
        }

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method, &request.params);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        // Check hang_on — never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        // Response delay
        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        // Check fail_on — return `InternalError`
        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("mockls: configured to fail on {method}"),
                }),
            });
            return;
        }

        let result = match method {
            "initialize" => Self::handle_initialize(),
            "shutdown" => Value::Null,
            "textDocument/hover" => self.handle_hover(&request.params),
            "textDocument/definition" => self.handle_definition(&request.params),
            "textDocument/references" => self.handle_references(&request.params),
            "textDocument/prepareCallHierarchy" | "textDocument/prepareTypeHierarchy" => {
                self.handle_prepare_hierarchy(&request.params)
            }
            "callHierarchy/incomingCalls" => self.handle_calls(&request.params, Direction::Incoming),
            "callHierarchy/outgoingCalls" => self.handle_calls(&request.params, Direction::Outgoing),
            "typeHierarchy/supertypes" => self.handle_types(&request.params, Direction::Outgoing),
            "typeHierarchy/subtypes" => self.handle_types(&request.params, Direction::Incoming),
            _ => {
                self.send_response(&Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: None,
                    error: Some(RpcError {
                        code: -32601,
                        message: format!("mockls: method not found: {method}"),
                    }),
                });
                return;
            }
        };

        self.send_response(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        });

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());

                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "textDocument/didClose" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    self.documents.remove(uri);
                }
            }
            "exit" => {
                self.shutdown_flag.store(true, Ordering::SeqCst);
                std::process::exit(0);
            }
            // initialized and all others are silently accepted
            _ => {}
        }
    }

    fn handle_initialize() -> Value {
        serde_json::json!({
            "capabilities": {
                "hoverProvider": true,
                "definitionProvider": true,
                "referencesProvider": true,
                "callHierarchyProvider": true,
                "typeHierarchyProvider": true,
                "textDocumentSync": {
                    "openClose": true,
                    "change": 1
                }
            }
        })
    }

    fn handle_hover(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(word) = self
            .documents
            .get(uri)
            .and_then(|content| extract_word(content, line, col))
        else {
            return Value::Null;
        };

        serde_json::json!({
            "contents": {
                "kind": "markdown",
                "value": format!("```\n{word}\n```")
            }
        })
    }

    fn handle_definition(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };
        let Some(word) = extract_word(content, line, col) else {
            return Value::Null;
        };

        // First occurrence is the definition.
        for (line_idx, line_text) in content.lines().enumerate() {
            if let Some(col_idx) = line_text.find(&word) {
                return location_json(uri, line_idx, col_idx, col_idx + word.len());
            }
        }
        Value::Null
    }

    fn handle_references(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };
        let Some(word) = extract_word(content, line, col) else {
            return Value::Null;
        };

        let mut locations = Vec::new();
        for (line_idx, line_text) in content.lines().enumerate() {
            let mut start = 0;
            while let Some(pos) = line_text[start..].find(&word) {
                let col_idx = start + pos;
                locations.push(location_json(uri, line_idx, col_idx, col_idx + word.len()));
                start = col_idx + word.len();
            }
        }

        Value::Array(locations)
    }

    /// Resolves the word at the position into a single hierarchy item.
    fn handle_prepare_hierarchy(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(content) = self.documents.get(uri) else {
            return Value::Null;
        };
        let Some(word) = extract_word(content, line, col) else {
            return Value::Null;
        };

        Value::Array(vec![item_json(uri, content, &word)])
    }

    fn handle_calls(&self, params: &Value, direction: Direction) -> Value {
        let Some((uri, content, name)) = self.item_context(params) else {
            return Value::Null;
        };

        let related: Vec<Value> = parse_edges(content)
            .into_iter()
            .filter_map(|(from, to)| match direction {
                Direction::Incoming if to == name => Some(serde_json::json!({
                    "from": item_json(uri, content, &from),
                    "fromRanges": [zero_range()]
                })),
                Direction::Outgoing if from == name => Some(serde_json::json!({
                    "to": item_json(uri, content, &to),
                    "fromRanges": [zero_range()]
                })),
                _ => None,
            })
            .collect();

        Value::Array(related)
    }

    /// Type edges read `child -> parent`: supertypes follow the edge,
    /// subtypes walk it backwards.
    fn handle_types(&self, params: &Value, direction: Direction) -> Value {
        let Some((uri, content, name)) = self.item_context(params) else {
            return Value::Null;
        };

        let related: Vec<Value> = parse_edges(content)
            .into_iter()
            .filter_map(|(from, to)| match direction {
                Direction::Outgoing if from == name => Some(item_json(uri, content, &to)),
                Direction::Incoming if to == name => Some(item_json(uri, content, &from)),
                _ => None,
            })
            .collect();

        Value::Array(related)
    }

    /// Pulls `(uri, document content, item name)` out of hierarchy
    /// expansion params.
    fn item_context<'a>(&'a self, params: &'a Value) -> Option<(&'a str, &'a str, &'a str)> {
        let item = params.get("item")?;
        let uri = item.get("uri").and_then(Value::as_str)?;
        let name = item.get("name").and_then(Value::as_str)?;
        let content = self.documents.get(uri)?;
        Some((uri, content, name))
    }

    fn publish_diagnostics(&self, uri: &str) {
        let delay = self.args.diagnostics_delay;
        let count = self.args.diagnostics_count;
        let uri_owned = uri.to_string();
        let writer = self.writer.clone();

        if delay > 0 {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                send_diagnostics_notification(&writer, &uri_owned, count);
            });
        } else {
            send_diagnostics_notification(&self.writer, &uri_owned, count);
        }
    }

    fn send_configuration_request(&self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "mockls" }] }
            }),
        );
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };

        write_framed(&self.writer, &json);

        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Incoming,
    Outgoing,
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Build a JSON `Location` object.
fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

fn zero_range() -> Value {
    serde_json::json!({
        "start": { "line": 0, "character": 0 },
        "end": { "line": 0, "character": 1 }
    })
}

/// Build a hierarchy item anchored at the name's first occurrence.
fn item_json(uri: &str, content: &str, name: &str) -> Value {
    let (line, col) = content
        .lines()
        .enumerate()
        .find_map(|(line_idx, line_text)| line_text.find(name).map(|col| (line_idx, col)))
        .unwrap_or((0, 0));

    serde_json::json!({
        "name": name,
        "kind": 12,
        "uri": uri,
        "range": {
            "start": { "line": line, "character": col },
            "end": { "line": line, "character": col + name.len() }
        },
        "selectionRange": {
            "start": { "line": line, "character": col },
            "end": { "line": line, "character": col + name.len() }
        }
    })
}

/// Parse `a -> b` edges out of document content, one per line.
fn parse_edges(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let (from, to) = line.split_once("->")?;
            let from = from.trim();
            let to = to.trim();
            (!from.is_empty() && !to.is_empty())
                .then(|| (from.to_string(), to.to_string()))
        })
        .collect()
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Send a `publishDiagnostics` notification with `count` diagnostics,
/// severities cycling error → warning → information.
fn send_diagnostics_notification(writer: &Writer, uri: &str, count: u64) {
    let diagnostics: Vec<Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "range": {
                    "start": { "line": i, "character": 0 },
                    "end": { "line": i, "character": 1 }
                },
                "severity": (i % 3) + 1,
                "source": "mockls",
                "message": format!("mockls: mock diagnostic {}", i + 1)
            })
        })
        .collect();

    send_message(
        writer,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diagnostics }
        }),
    );
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            response_delay: 0,
            diagnostics_delay: 0,
            diagnostics_count: 1,
            no_diagnostics: false,
            drop_after: None,
            hang_on: vec![],
            fail_on: vec![],
            crash_on: vec![],
            send_configuration_request: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn initialize_request(id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": {},
                "rootUri": "file:///tmp/test"
            }
        })
        .to_string()
    }

    fn shutdown_request(id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "shutdown",
            "params": null
        })
        .to_string()
    }

    fn did_open_notification(uri: &str, text: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "plaintext",
                    "version": 1,
                    "text": text
                }
            }
        })
        .to_string()
    }

    fn position_request(id: u64, method: &str, uri: &str, line: u64, character: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character }
            }
        })
        .to_string()
    }

    fn item_request(id: u64, method: &str, uri: &str, name: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": {
                "item": {
                    "name": name,
                    "kind": 12,
                    "uri": uri,
                    "range": zero_range(),
                    "selectionRange": zero_range()
                }
            }
        })
        .to_string()
    }

    fn by_id(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
            .expect("response with matching id")
    }

    #[test]
    fn initialize_advertises_hierarchy_providers() {
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(default_args(), &input);

        let caps = &messages[0]["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(caps["callHierarchyProvider"], true);
        assert_eq!(caps["typeHierarchyProvider"], true);
        assert!(messages[0]["error"].is_null());
    }

    #[test]
    fn hover_returns_word_under_cursor() {
        let uri = "file:///tmp/test.txt";
        let text = "alpha -> beta\nbeta -> gamma\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&position_request(2, "textDocument/hover", uri, 1, 0)));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(default_args(), &input);
        let hover = by_id(&messages, 2);
        assert!(
            hover["result"]["contents"]["value"]
                .as_str()
                .unwrap()
                .contains("beta")
        );
    }

    #[test]
    fn prepare_hierarchy_anchors_on_word() {
        let uri = "file:///tmp/graph.txt";
        let text = "alpha -> callee\nbeta -> callee\ncallee -> helper\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&position_request(
            2,
            "textDocument/prepareCallHierarchy",
            uri,
            0,
            9,
        )));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(default_args(), &input);
        let items = by_id(&messages, 2)["result"].as_array().unwrap().clone();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "callee");
        assert_eq!(items[0]["kind"], 12);
    }

    #[test]
    fn incoming_and_outgoing_follow_the_edge_list() {
        let uri = "file:///tmp/graph.txt";
        let text = "alpha -> callee\nbeta -> callee\ncallee -> helper\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&item_request(
            2,
            "callHierarchy/incomingCalls",
            uri,
            "callee",
        )));
        input.extend(frame(&item_request(
            3,
            "callHierarchy/outgoingCalls",
            uri,
            "callee",
        )));
        input.extend(frame(&shutdown_request(4)));

        let messages = run_server_with(default_args(), &input);

        let incoming = by_id(&messages, 2)["result"].as_array().unwrap().clone();
        assert_eq!(incoming.len(), 2);
        let callers: Vec<&str> = incoming
            .iter()
            .map(|c| c["from"]["name"].as_str().unwrap())
            .collect();
        assert!(callers.contains(&"alpha") && callers.contains(&"beta"));

        let outgoing = by_id(&messages, 3)["result"].as_array().unwrap().clone();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0]["to"]["name"], "helper");
    }

    #[test]
    fn type_hierarchy_walks_edges_both_ways() {
        let uri = "file:///tmp/types.txt";
        let text = "Square -> Shape\nCircle -> Shape\nShape -> Drawable\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&item_request(
            2,
            "typeHierarchy/supertypes",
            uri,
            "Shape",
        )));
        input.extend(frame(&item_request(
            3,
            "typeHierarchy/subtypes",
            uri,
            "Shape",
        )));
        input.extend(frame(&shutdown_request(4)));

        let messages = run_server_with(default_args(), &input);

        let supertypes = by_id(&messages, 2)["result"].as_array().unwrap().clone();
        assert_eq!(supertypes.len(), 1);
        assert_eq!(supertypes[0]["name"], "Drawable");

        let subtypes = by_id(&messages, 3)["result"].as_array().unwrap().clone();
        assert_eq!(subtypes.len(), 2);
    }

    #[test]
    fn diagnostics_count_cycles_severities() {
        let uri = "file:///tmp/test.txt";

        let mut args = default_args();
        args.diagnostics_count = 4;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "x\n")));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(args, &input);
        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");

        let diagnostics = diag["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 4);
        let severities: Vec<u64> = diagnostics
            .iter()
            .map(|d| d["severity"].as_u64().unwrap())
            .collect();
        assert_eq!(severities, vec![1, 2, 3, 1]);
    }

    #[test]
    fn no_diagnostics_flag_suppresses_publishes() {
        let uri = "file:///tmp/test.txt";

        let mut args = default_args();
        args.no_diagnostics = true;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "x\n")));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(args, &input);
        assert!(
            !messages.iter().any(|m| {
                m.get("method").and_then(Value::as_str)
                    == Some("textDocument/publishDiagnostics")
            })
        );
    }

    #[test]
    fn fail_on_returns_internal_error() {
        let uri = "file:///tmp/test.txt";

        let mut args = default_args();
        args.fail_on = vec!["textDocument/hover".to_string()];

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "word\n")));
        input.extend(frame(&position_request(2, "textDocument/hover", uri, 0, 0)));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(args, &input);
        let hover = by_id(&messages, 2);
        assert_eq!(hover["error"]["code"], -32603);
    }

    #[test]
    fn hang_on_suppresses_the_response() {
        let uri = "file:///tmp/test.txt";

        let mut args = default_args();
        args.hang_on = vec!["textDocument/hover".to_string()];

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "word\n")));
        input.extend(frame(&position_request(2, "textDocument/hover", uri, 0, 0)));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(args, &input);
        assert!(
            messages
                .iter()
                .all(|m| m.get("id").and_then(Value::as_u64) != Some(2)),
            "hung method must never answer"
        );
        assert!(
            messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_u64) == Some(3)),
            "later requests still answered"
        );
    }

    #[test]
    fn request_id_echo_preserves_type() {
        let init = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "initialize",
            "params": { "processId": null, "capabilities": {}, "rootUri": null }
        })
        .to_string();
        let shutdown = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "string-id",
            "method": "shutdown",
            "params": null
        })
        .to_string();

        let mut input = frame(&init);
        input.extend(frame(&shutdown));

        let messages = run_server_with(default_args(), &input);

        assert_eq!(messages[0]["id"], 42);
        assert!(
            messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_str) == Some("string-id"))
        );
    }
}
