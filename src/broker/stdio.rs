//! Outer framework shim: MCP over stdio
//!
//! The broker is launched by its agent framework with stdio as the
//! JSON-RPC transport. This module owns the read-dispatch-write loop and
//! translates between MCP tool calls and the tool surface. stdout carries
//! protocol lines only; diagnostics go to the log file.

use super::surface::{OuterTool, ToolSurface};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Incoming JSON-RPC message. Notifications carry no id and get no reply.
#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Serve MCP over stdio until stdin closes. `project_root` is where
/// discovery found (or will find) the host.
pub async fn serve(project_root: PathBuf) -> Result<()> {
    let surface = ToolSurface::new(project_root);

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .context("Failed to read stdin")?;
        if n == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: RpcMessage = match serde_json::from_str(trimmed) {
            Ok(m) => m,
            Err(e) => {
                crate::logging::warn(&format!("Undecodable JSON-RPC line: {}", e));
                continue;
            }
        };

        // Notifications (initialized, cancelled, …) get no reply.
        let Some(id) = message.id else {
            continue;
        };

        let reply = dispatch(&surface, id, &message.method, message.params).await;
        let mut out = reply.to_string();
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn dispatch(surface: &ToolSurface, id: Value, method: &str, params: Option<Value>) -> Value {
    match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": {
                    "name": "hostlink",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }
        }),
        "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
        "tools/list" => tools_list(surface, id).await,
        "tools/call" => tools_call(surface, id, params.unwrap_or(json!({}))).await,
        // Probed by most frameworks; we implement neither.
        "resources/list" => json!({"jsonrpc": "2.0", "id": id, "result": {"resources": []}}),
        "prompts/list" => json!({"jsonrpc": "2.0", "id": id, "result": {"prompts": []}}),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("Method not found: {}", method)}
        }),
    }
}

async fn tools_list(surface: &ToolSurface, id: Value) -> Value {
    let tools = match surface.refresh().await {
        Ok(tools) => tools,
        Err(e) => {
            // The host may not be up yet; advertise whatever we already
            // know rather than failing the whole session.
            crate::logging::warn(&format!("tools/list could not reach the host: {:#}", e));
            surface.registered_tools()
        }
    };

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "tools": tools.iter().map(tool_json).collect::<Vec<Value>>() }
    })
}

fn tool_json(tool: &OuterTool) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": tool.input_schema,
    })
}

async fn tools_call(surface: &ToolSurface, id: Value, params: Value) -> Value {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    if name.is_empty() {
        return call_reply(id, "Missing tool name".to_string(), None, true);
    }

    match surface.call(name, &arguments).await {
        Ok(outcome) => call_reply(id, outcome.text, outcome.structured, outcome.is_error),
        Err(e) => call_reply(id, format!("{:#}", e), None, true),
    }
}

/// Every call produces a structured result with an `isError` indicator;
/// transport/lifecycle failures become failed results, not RPC errors.
fn call_reply(id: Value, text: String, structured: Option<Value>, is_error: bool) -> Value {
    let mut result = json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error,
    });
    if let Some(structured) = structured {
        result["structuredContent"] = structured;
    }
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}
