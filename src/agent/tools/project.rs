use super::super::tool::{HostContext, HostTool, ToolContext};
use anyhow::Result;
use serde_json::{json, Value};

/// Reports project identity, host version, and how many tools the agent
/// currently exposes. Runs on the main thread: real hosts only expose
/// parts of this off their serialization loop.
pub struct GetProjectInfoTool;

impl HostTool for GetProjectInfoTool {
    fn name(&self) -> &str {
        "get_project_info"
    }

    fn description(&self) -> &str {
        "Get the open project's name, path, host version, and registered tool count."
    }

    fn requires_main_thread(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn execute(&self, host: &dyn HostContext, ctx: ToolContext, _args: Value) -> Result<Value> {
        Ok(json!({
            "projectName": host.project_name(),
            "projectPath": host.project_path().to_string_lossy(),
            "hostVersion": host.host_version(),
            "toolCount": ctx.tool_count,
        }))
    }
}
