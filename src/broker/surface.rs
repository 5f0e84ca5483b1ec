//! Dynamic tool surface
//!
//! Mirrors the host's tool catalog into outer-framework (MCP) tool
//! registrations and proxies invocations back over the inner protocol.
//! Registration is version-gated: when `list_tools` reports a version the
//! broker has already seen, sync is a no-op. Registrations are never
//! removed; the outer framework caches the list at session start.

use super::connection::AgentConnection;
use super::reconnect::ConnectionKeeper;
use crate::config::config;
use crate::schema::ToolDescriptor;
use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

/// Menu paths whose execution is known to trigger a host reload. The host
/// gives no explicit signal, so the broker recognizes the menu items that
/// reimport assets.
const RELOAD_TRIGGER_MENU_PATHS: &[&str] = &["Assets/Refresh", "Assets/Reimport All"];

const MENU_TOOL: &str = "execute_menu_item";

/// An outer-framework tool registration translated from a descriptor.
#[derive(Debug, Clone)]
pub struct OuterTool {
    pub name: String,
    pub description: String,
    /// Translated JSON Schema for the framework's runtime validation.
    pub input_schema: Value,
}

/// Outcome of a proxied invocation, ready for the outer framework.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub text: String,
    /// The tool result parsed back into structured content, when the data
    /// payload was parseable JSON.
    pub structured: Option<Value>,
    pub is_error: bool,
}

pub struct ToolSurface {
    keeper: Mutex<ConnectionKeeper>,
    registered: StdMutex<HashMap<String, OuterTool>>,
    /// Last catalog version synced; 0 means never.
    cached_version: AtomicU64,
}

impl ToolSurface {
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            keeper: Mutex::new(ConnectionKeeper::new(project_root)),
            registered: StdMutex::new(HashMap::new()),
            cached_version: AtomicU64::new(0),
        }
    }

    /// Currently-registered outer tools, name-sorted for stable listings.
    pub fn registered_tools(&self) -> Vec<OuterTool> {
        let mut tools: Vec<OuterTool> = self
            .registered
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Connect (or reconnect) and mirror the host's catalog. Returns the
    /// registered tool list.
    pub async fn refresh(&self) -> Result<Vec<OuterTool>> {
        let ensured = {
            let mut keeper = self.keeper.lock().await;
            keeper.ensure_connection(false).await?
        };
        self.sync_catalog(&ensured.conn).await?;
        Ok(self.registered_tools())
    }

    /// Fetch the catalog and register whatever is new. No-op when the
    /// version matches the cache and tools are already registered.
    async fn sync_catalog(&self, conn: &AgentConnection) -> Result<()> {
        let catalog = conn.list_tools().await?;

        let cached = self.cached_version.load(Ordering::SeqCst);
        let have_tools = self
            .registered
            .lock()
            .map(|map| !map.is_empty())
            .unwrap_or(false);
        if catalog.version == cached && have_tools {
            return Ok(());
        }

        let mut added = 0;
        if let Ok(mut registered) = self.registered.lock() {
            for descriptor in &catalog.tools {
                if registered.contains_key(&descriptor.name) {
                    continue;
                }
                match translate_descriptor(descriptor) {
                    Ok(tool) => {
                        registered.insert(tool.name.clone(), tool);
                        added += 1;
                    }
                    Err(e) => {
                        crate::logging::warn(&format!(
                            "Skipping tool '{}' with untranslatable schema: {}",
                            descriptor.name, e
                        ));
                    }
                }
            }
        }
        self.cached_version.store(catalog.version, Ordering::SeqCst);

        crate::logging::info(&format!(
            "Tool catalog v{} synced ({} new, {} total)",
            catalog.version,
            added,
            catalog.tools.len()
        ));
        Ok(())
    }

    /// Proxy one outer tool call to the agent.
    pub async fn call(&self, name: &str, arguments: &Value) -> Result<CallOutcome> {
        let arguments_json = serde_json::to_string(arguments)?;

        let ensured = {
            let mut keeper = self.keeper.lock().await;
            keeper.ensure_connection(false).await?
        };
        if ensured.reconnected {
            self.sync_catalog(&ensured.conn).await?;
        }
        let response = ensured.conn.invoke_tool(name, &arguments_json).await?;

        let mut outcome = if response.ok {
            match serde_json::from_str::<Value>(&response.data) {
                Ok(structured) => CallOutcome {
                    text: response.data.clone(),
                    structured: Some(structured),
                    is_error: false,
                },
                Err(_) => CallOutcome {
                    text: response.data.clone(),
                    structured: None,
                    is_error: false,
                },
            }
        } else {
            CallOutcome {
                text: response.error.clone(),
                structured: None,
                is_error: true,
            }
        };

        if !outcome.is_error && is_reload_trigger(name, arguments) {
            outcome.text = self.ride_out_reload(outcome.text).await;
        }

        Ok(outcome)
    }

    /// After a reload-triggering call: give the host a moment to start
    /// tearing down, then re-ensure with `expecting_reload` so we never
    /// latch back onto the dying server.
    async fn ride_out_reload(&self, text: String) -> String {
        tokio::time::sleep(config().settle_delay()).await;

        let result = {
            let mut keeper = self.keeper.lock().await;
            keeper.ensure_connection(true).await
        };
        match result {
            Ok(ensured) => {
                let advisory = "Host reloaded and is ready.";
                if let Err(e) = self.sync_catalog(&ensured.conn).await {
                    crate::logging::warn(&format!("Post-reload tool sync failed: {}", e));
                }
                format!("{}\n{}", text, advisory)
            }
            Err(e) => {
                crate::logging::warn(&format!("Post-reload reconnect failed: {}", e));
                format!(
                    "{}\nHost may still be reloading; retry if the next call fails.",
                    text
                )
            }
        }
    }
}

/// Whether this invocation is in the reload-triggering set.
fn is_reload_trigger(tool: &str, arguments: &Value) -> bool {
    if tool != MENU_TOOL {
        return false;
    }
    arguments
        .get("path")
        .and_then(|p| p.as_str())
        .map(|path| RELOAD_TRIGGER_MENU_PATHS.contains(&path))
        .unwrap_or(false)
}

/// Translate a descriptor into an outer registration, preserving types,
/// constraints, defaults, optionality, and descriptions.
pub fn translate_descriptor(descriptor: &ToolDescriptor) -> Result<OuterTool> {
    let schema = descriptor.schema_value()?;
    Ok(OuterTool {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        input_schema: translate_schema(&schema),
    })
}

/// Rebuild a schema node keeping only the draft-07 subset the host emits.
/// Unknown keywords are dropped; everything the outer framework validates
/// with is carried through.
fn translate_schema(node: &Value) -> Value {
    let Some(obj) = node.as_object() else {
        return json!({});
    };

    let mut out = serde_json::Map::new();
    for key in ["type", "description", "default", "minimum", "maximum", "enum"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }

    if let Some(required) = obj.get("required").and_then(|r| r.as_array()) {
        if !required.is_empty() {
            out.insert("required".to_string(), Value::Array(required.clone()));
        }
    }

    if let Some(props) = obj.get("properties").and_then(|p| p.as_object()) {
        let translated: serde_json::Map<String, Value> = props
            .iter()
            .map(|(name, sub)| (name.clone(), translate_schema(sub)))
            .collect();
        out.insert("properties".to_string(), Value::Object(translated));
    }

    if let Some(items) = obj.get("items") {
        out.insert("items".to_string(), translate_schema(items));
    }

    Value::Object(out)
}
