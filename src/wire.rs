//! Inner wire protocol between the broker and the in-host agent
//!
//! Newline-delimited JSON over loopback TCP, one envelope per line.
//! `params` and `data` are JSON *strings* embedded in the envelope: the
//! host's JSON facility cannot carry arbitrary nested objects, so payloads
//! are double-encoded and re-parsed by the receiver against its own schema.

use serde::{Deserialize, Serialize};

/// Command names understood by the agent.
pub const CMD_PING: &str = "ping";
pub const CMD_LIST_TOOLS: &str = "list_tools";
pub const CMD_INVOKE_TOOL: &str = "invoke_tool";

/// Request id used when an incoming line cannot be decoded far enough to
/// recover the real id.
pub const UNKNOWN_ID: &str = "unknown";

/// Request envelope sent by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub cmd: String,
    /// Parameter payload as an embedded JSON string; empty when the command
    /// takes no parameters.
    #[serde(default)]
    pub params: String,
}

/// Response envelope sent by the agent. Exactly one of `data`/`error` is
/// meaningful, consistent with `ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub error: String,
}

impl Request {
    pub fn new(id: impl Into<String>, cmd: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cmd: cmd.into(),
            params: params.into(),
        }
    }
}

impl Response {
    pub fn success(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            data: data.into(),
            error: String::new(),
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            data: String::new(),
            error: error.into(),
        }
    }
}

/// Parameters of `invoke_tool`, carried double-encoded in `Request::params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeParams {
    pub tool: String,
    /// Arguments for the target tool, as a JSON string matching the tool's
    /// parameter schema.
    #[serde(default)]
    pub arguments: String,
}

/// Payload of a successful `ping`, serialized into `Response::data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub status: String,
    #[serde(rename = "hostVersion")]
    pub host_version: String,
    #[serde(rename = "projectName")]
    pub project_name: String,
}

/// Encode an envelope as a single newline-terminated JSON line.
pub fn encode_request(request: &Request) -> String {
    let mut json = serde_json::to_string(request).unwrap_or_else(|_| "{}".to_string());
    json.push('\n');
    json
}

pub fn encode_response(response: &Response) -> String {
    let mut json = serde_json::to_string(response).unwrap_or_else(|_| "{}".to_string());
    json.push('\n');
    json
}

pub fn decode_request(line: &str) -> Result<Request, serde_json::Error> {
    serde_json::from_str(line)
}

pub fn decode_response(line: &str) -> Result<Response, serde_json::Error> {
    serde_json::from_str(line)
}

/// Best-effort recovery of the request id from a line that failed to decode
/// as a full envelope, so the error response can still be correlated.
pub fn salvage_request_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from))
        .unwrap_or_else(|| UNKNOWN_ID.to_string())
}

/// Accumulates raw socket bytes and yields complete `\n`-terminated lines.
///
/// Any trailing partial line is retained as the prefix of the next push.
/// Blank lines are dropped.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop(); // trailing \n
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }
}
