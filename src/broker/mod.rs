//! The external broker: discovery, resilient TCP session, dynamic tool
//! surface, and the stdio MCP shim.

pub mod connection;
pub mod reconnect;
pub mod stdio;
pub mod surface;
