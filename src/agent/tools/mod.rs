//! Built-in tools registered at agent startup
//!
//! Runtime type enumeration from the original design becomes an explicit
//! registration list here; the registry freezes it before the server
//! accepts connections.

mod logs;
mod menu;
mod project;

use super::tool::HostTool;
use std::sync::Arc;

pub use logs::ReadConsoleLogsTool;
pub use menu::ExecuteMenuItemTool;
pub use project::GetProjectInfoTool;

/// One instance of every built-in tool.
pub fn builtin_tools() -> Vec<Arc<dyn HostTool>> {
    vec![
        Arc::new(ReadConsoleLogsTool),
        Arc::new(ExecuteMenuItemTool),
        Arc::new(GetProjectInfoTool),
    ]
}
