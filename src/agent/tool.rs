//! Tool-capability contract for in-host tools
//!
//! Tools run inside the host process and reach host services only through
//! `HostContext`, so the same tool set works in any embedding host (and in
//! the test harness). Execution is synchronous: background-safe tools run
//! on reader threads, the rest on the host main thread via the drain.

use crate::schema::ToolDescriptor;
use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;

/// Severity of a host console entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Info => "info",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(LogSeverity::Info),
            "warning" => Some(LogSeverity::Warning),
            "error" => Some(LogSeverity::Error),
            _ => None,
        }
    }
}

/// One captured host console entry.
#[derive(Debug, Clone)]
pub struct ConsoleEntry {
    pub severity: LogSeverity,
    pub message: String,
    /// Host-local capture time, RFC 3339.
    pub timestamp: String,
}

/// Host services available to tools.
///
/// `host_version` and `project_name` are also used by the `ping` handler on
/// background threads, so implementations must answer them without touching
/// the host main loop.
pub trait HostContext: Send + Sync {
    fn host_version(&self) -> String;

    fn project_name(&self) -> String;

    fn project_path(&self) -> PathBuf;

    /// Most recent console entries, newest last.
    fn recent_logs(&self, max: usize, severity: Option<LogSeverity>) -> Vec<ConsoleEntry>;

    /// Execute a named menu item (e.g. `Assets/Refresh`). Runs on whichever
    /// thread the caller is on; menu tools declare `requires_main_thread`.
    fn execute_menu_item(&self, path: &str) -> Result<String>;
}

/// Per-invocation context handed to tools alongside the host seam. Built
/// by the registry, which is the only caller that knows catalog-level
/// facts like its own size.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    /// Number of tools in the registry servicing this invocation.
    pub tool_count: usize,
}

/// A tool registered with the in-host agent.
pub trait HostTool: Send + Sync {
    /// Unique snake_case name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether `execute` must run on the host main thread.
    fn requires_main_thread(&self) -> bool {
        false
    }

    /// JSON Schema (draft-07 subset) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with already-parsed arguments. Arguments have passed the
    /// required-field check against `parameters_schema` before this runs.
    fn execute(&self, host: &dyn HostContext, ctx: ToolContext, args: Value) -> Result<Value>;

    /// Wire descriptor, with the schema serialized into a string.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            requires_main_thread: self.requires_main_thread(),
            parameter_schema: self.parameters_schema().to_string(),
        }
    }
}
