use super::super::tool::{HostContext, HostTool, ToolContext};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

/// Executes a host menu item by path. Menu handlers manipulate host state,
/// so this always runs on the main thread. Some menu items (asset refresh)
/// tear down and recreate the agent; the broker knows which ones.
pub struct ExecuteMenuItemTool;

#[derive(Deserialize)]
struct MenuInput {
    path: String,
}

impl HostTool for ExecuteMenuItemTool {
    fn name(&self) -> &str {
        "execute_menu_item"
    }

    fn description(&self) -> &str {
        "Execute a host menu item by its path, e.g. 'Assets/Refresh'."
    }

    fn requires_main_thread(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Menu item path, segments separated by '/'"
                }
            },
            "required": ["path"]
        })
    }

    fn execute(&self, host: &dyn HostContext, _ctx: ToolContext, args: Value) -> Result<Value> {
        let params: MenuInput = serde_json::from_value(args)?;
        let detail = host.execute_menu_item(&params.path)?;
        Ok(json!({"executed": params.path, "detail": detail}))
    }
}
