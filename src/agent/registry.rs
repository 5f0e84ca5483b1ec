//! Tool registry for the in-host agent
//!
//! Built once per agent lifecycle (startup and after each host reload) and
//! frozen before the server starts accepting connections; readers and the
//! drain may assume a stable registry.

use super::tool::{HostContext, HostTool, ToolContext};
use crate::schema::{missing_required_fields, ToolCatalog};
use crate::wire::Response;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Catalog version counter. Process-wide so the version keeps increasing
/// across reloads, which tear the registry down and rebuild it inside the
/// same host process.
static CATALOG_VERSION: AtomicU64 = AtomicU64::new(0);

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn HostTool>>,
    version: u64,
}

impl ToolRegistry {
    /// Run a discovery pass over the given tool instances and freeze the
    /// result. Tools with duplicate or empty names are rejected with a
    /// warning, not an error.
    pub fn build(tools: Vec<Arc<dyn HostTool>>) -> Self {
        let version = CATALOG_VERSION.fetch_add(1, Ordering::SeqCst) + 1;
        let mut map: HashMap<String, Arc<dyn HostTool>> = HashMap::new();

        for tool in tools {
            let name = tool.name().to_string();
            if name.is_empty() {
                crate::logging::warn("Rejected tool with empty name");
                continue;
            }
            if map.contains_key(&name) {
                crate::logging::warn(&format!("Rejected duplicate tool '{}'", name));
                continue;
            }
            map.insert(name, tool);
        }

        crate::logging::info(&format!(
            "Tool registry built: {} tools, catalog version {}",
            map.len(),
            version
        ));

        Self {
            tools: map,
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HostTool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors for every registered tool. Ordering is not significant;
    /// callers key by name.
    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog {
            version: self.version,
            tools: self.tools.values().map(|t| t.descriptor()).collect(),
        }
    }

    /// Invoke a tool and produce its wire response. Never panics the
    /// caller: every failure mode becomes an `ok=false` envelope.
    pub fn invoke(
        &self,
        host: &dyn HostContext,
        id: &str,
        name: &str,
        arguments_json: &str,
    ) -> Response {
        let Some(tool) = self.get(name) else {
            return Response::failure(id, format!("Unknown tool: {}", name));
        };

        let args_text = if arguments_json.trim().is_empty() {
            "{}"
        } else {
            arguments_json
        };
        let args: serde_json::Value = match serde_json::from_str(args_text) {
            Ok(v) => v,
            Err(e) => {
                return Response::failure(id, format!("Invalid arguments for '{}': {}", name, e));
            }
        };

        let schema = tool.parameters_schema();
        let missing = missing_required_fields(&schema, &args);
        if !missing.is_empty() {
            return Response::failure(
                id,
                format!(
                    "Invalid arguments for '{}': missing required parameter(s): {}",
                    name,
                    missing.join(", ")
                ),
            );
        }

        let ctx = ToolContext {
            tool_count: self.len(),
        };
        match tool.execute(host, ctx, args) {
            Ok(result) => Response::success(id, result.to_string()),
            Err(e) => {
                crate::logging::error(&format!("Tool '{}' failed: {:#}", name, e));
                Response::failure(id, format!("Tool '{}' failed: {}", name, e))
            }
        }
    }
}
