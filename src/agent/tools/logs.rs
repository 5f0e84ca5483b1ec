use super::super::tool::{HostContext, HostTool, LogSeverity, ToolContext};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

const MAX_ENTRIES_CAP: u64 = 500;
const DEFAULT_MAX_ENTRIES: u64 = 50;

/// Returns recent host console entries. Background-safe: the console ring
/// is read without touching the host main loop.
pub struct ReadConsoleLogsTool;

#[derive(Deserialize)]
struct LogsInput {
    #[serde(default)]
    max_entries: Option<u64>,
    #[serde(default)]
    severity: Option<String>,
}

impl HostTool for ReadConsoleLogsTool {
    fn name(&self) -> &str {
        "read_console_logs"
    }

    fn description(&self) -> &str {
        "Read recent entries from the host console. Optionally filter by severity."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_entries": {
                    "type": "integer",
                    "description": "Maximum number of entries to return",
                    "default": DEFAULT_MAX_ENTRIES,
                    "minimum": 1,
                    "maximum": MAX_ENTRIES_CAP
                },
                "severity": {
                    "type": "string",
                    "description": "Only return entries of this severity",
                    "enum": ["info", "warning", "error"]
                }
            }
        })
    }

    fn execute(&self, host: &dyn HostContext, _ctx: ToolContext, args: Value) -> Result<Value> {
        let params: LogsInput = serde_json::from_value(args)?;

        let max = params
            .max_entries
            .unwrap_or(DEFAULT_MAX_ENTRIES)
            .clamp(1, MAX_ENTRIES_CAP) as usize;

        let severity = match params.severity.as_deref() {
            Some(s) => Some(
                LogSeverity::parse(s)
                    .ok_or_else(|| anyhow::anyhow!("Unknown severity '{}'", s))?,
            ),
            None => None,
        };

        let entries = host.recent_logs(max, severity);
        let logs: Vec<Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "severity": e.severity.as_str(),
                    "message": e.message,
                    "timestamp": e.timestamp,
                })
            })
            .collect();

        Ok(json!({"count": logs.len(), "entries": logs}))
    }
}
