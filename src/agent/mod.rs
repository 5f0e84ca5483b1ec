//! The in-host agent: registry + server + waker, bundled as one lifecycle
//!
//! A host embeds the agent by constructing an [`Agent`] at init, calling
//! [`Agent::drain`] from its main loop every tick, and calling
//! [`Agent::shutdown`] before teardown. A reload is shutdown followed by a
//! fresh `Agent::start` in the same process: new port, bumped catalog
//! version, overwritten discovery record.

pub mod registry;
pub mod server;
pub mod tool;
pub mod tools;
pub mod waker;

use anyhow::Result;
use registry::ToolRegistry;
use server::AgentServer;
use std::path::Path;
use std::sync::Arc;
use tool::{HostContext, HostTool};
use waker::WindowWaker;

/// Process-wide lifecycle record for one agent incarnation. Created at
/// init, torn down at shutdown; holds the listener, the frozen registry,
/// and the waker. Passed around explicitly rather than living in a global.
pub struct Agent {
    server: AgentServer,
}

impl Agent {
    /// Start with the built-in tool set.
    pub fn start(
        host: Arc<dyn HostContext>,
        waker: Arc<dyn WindowWaker>,
        project_root: &Path,
    ) -> Result<Self> {
        Self::start_with_tools(host, waker, project_root, tools::builtin_tools())
    }

    /// Start with an explicit tool set (hosts can extend the built-ins).
    pub fn start_with_tools(
        host: Arc<dyn HostContext>,
        waker: Arc<dyn WindowWaker>,
        project_root: &Path,
        tools: Vec<Arc<dyn HostTool>>,
    ) -> Result<Self> {
        waker.initialize();
        let registry = Arc::new(ToolRegistry::build(tools));
        let server = AgentServer::start(host, registry, waker, project_root)?;
        Ok(Self { server })
    }

    /// Loopback port the agent is listening on (also in the discovery
    /// record).
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Main-thread hook: execute queued main-thread-lane requests. Returns
    /// the number serviced.
    pub fn drain(&self) -> usize {
        self.server.drain()
    }

    /// Clean shutdown: stop accepting, fail parked requests, delete the
    /// discovery record.
    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}
