//! hostlink: a bidirectional bridge between an interactive editor host
//! and an MCP agent framework.
//!
//! Two halves share this crate:
//!
//! - [`agent`]: the in-host side. A loopback TCP server with background
//!   reader threads, a main-thread dispatch queue drained from the host's
//!   tick, a frozen self-describing tool registry, and a window waker for
//!   minimized hosts.
//! - [`broker`]: the external side. Discovers the host through
//!   `Library/MCPInstance.json`, keeps a resilient connection that
//!   survives host reloads, and re-advertises the host's tools over MCP.

pub mod agent;
pub mod broker;
pub mod config;
pub mod discovery;
pub mod host;
pub mod logging;
pub mod schema;
pub mod storage;
pub mod wire;
