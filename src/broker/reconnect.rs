//! Reconnect controller
//!
//! `ensure_connection` runs before every outer request. It revalidates the
//! current session, reopens one from the discovery record, or — when the
//! host is reloading — waits out the reload with backed-off polling until
//! a fresh agent answers.
//!
//! A reload tears down the agent inside the same host process: the pid
//! stays, the port changes, and there is a window where the discovery file
//! is missing or still describes the dead pre-reload server.

use super::connection::AgentConnection;
use crate::config::config;
use crate::discovery;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Connection state, as observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
    /// A connection existed but stopped answering.
    Stale,
    WaitingForReload,
}

/// Result of `ensure_connection`: the live session plus whether it was
/// newly opened (new sessions need a tool resync). The session is shared:
/// callers hold a clone so the keeper lock never spans a slow invocation.
pub struct Ensured {
    pub conn: Arc<AgentConnection>,
    pub reconnected: bool,
}

impl std::fmt::Debug for Ensured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ensured")
            .field("reconnected", &self.reconnected)
            .finish()
    }
}

pub struct ConnectionKeeper {
    project_root: PathBuf,
    conn: Option<Arc<AgentConnection>>,
    /// Pid seen when a connection last succeeded; consulted when the
    /// discovery record is missing or dead.
    cached_pid: Option<u32>,
    /// Port of the most recent live connection, for stale-server detection
    /// during a reload.
    last_port: Option<u16>,
    state: ConnState,
}

impl ConnectionKeeper {
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            conn: None,
            cached_pid: None,
            last_port: None,
            state: ConnState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn project_root(&self) -> &PathBuf {
        &self.project_root
    }

    /// Get a live connection, reconnecting as needed.
    ///
    /// With `expecting_reload` the caller has just submitted a command
    /// known to trigger a reload: the current session is never revalidated
    /// (even if momentarily still reachable) and polling refuses the
    /// pre-reload server until a disconnect or port change is observed.
    pub async fn ensure_connection(&mut self, expecting_reload: bool) -> Result<Ensured> {
        if !expecting_reload {
            if let Some(conn) = self.conn.clone() {
                if !conn.is_closed() && conn.ping().await.is_ok() {
                    self.state = ConnState::Open;
                    return Ok(Ensured {
                        conn,
                        reconnected: false,
                    });
                }
                self.state = ConnState::Stale;
            }
        }

        // Whatever we held is no longer trusted.
        let old_disconnect_observed = match self.conn.take() {
            Some(old) => {
                let closed = old.is_closed();
                old.close().await;
                closed
            }
            None => true,
        };

        self.state = ConnState::Connecting;
        let direct = match discovery::read_live_record(&self.project_root) {
            Ok(record) if !(expecting_reload && Some(record.port) == self.last_port) => {
                Some(record)
            }
            _ => None,
        };

        if let Some(record) = direct {
            if let Ok((conn, _reply)) = AgentConnection::connect(record.port).await {
                return Ok(self.adopt(conn, record.pid));
            }
        }

        // No usable record, or the agent there did not answer. If the host
        // process we last talked to is still alive, it is likely mid-reload.
        let host_alive = self
            .cached_pid
            .map(discovery::is_process_running)
            .unwrap_or(false);
        if !host_alive {
            self.state = ConnState::Disconnected;
            anyhow::bail!("Host is not running (no discovery record and no live host process)");
        }

        self.wait_for_reload(expecting_reload, old_disconnect_observed)
            .await
    }

    fn adopt(&mut self, conn: AgentConnection, pid: u32) -> Ensured {
        let conn = Arc::new(conn);
        self.cached_pid = Some(pid);
        self.last_port = Some(conn.port());
        self.state = ConnState::Open;
        self.conn = Some(Arc::clone(&conn));
        Ensured {
            conn,
            reconnected: true,
        }
    }

    /// Poll with exponential backoff until a fresh agent answers, the
    /// budget runs out, or the host process dies.
    async fn wait_for_reload(
        &mut self,
        expecting_reload: bool,
        mut disconnect_observed: bool,
    ) -> Result<Ensured> {
        self.state = ConnState::WaitingForReload;

        let pre_reload_port = self.last_port;
        let deadline = Instant::now() + config().reload_timeout();
        let cap = config().reload_poll_cap();
        let mut delay = config().reload_poll_floor();
        let mut last_error = String::from("discovery record not seen");

        loop {
            if Instant::now() >= deadline {
                self.state = ConnState::Stale;
                anyhow::bail!("Timed out waiting for host reload: {}", last_error);
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(cap);

            let record = match discovery::read_record(&self.project_root) {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("{:#}", e);
                    continue;
                }
            };

            if !discovery::is_process_running(record.pid) {
                last_error = format!("host pid {} is not running", record.pid);
                continue;
            }

            if Some(record.port) != pre_reload_port {
                disconnect_observed = true;
            }
            if expecting_reload && !disconnect_observed {
                // Still the stale pre-reload server; keep waiting.
                last_error = format!("pre-reload server still advertised on {}", record.port);
                continue;
            }

            match AgentConnection::connect(record.port).await {
                Ok((conn, _reply)) => {
                    crate::logging::info(&format!(
                        "Reconnected to agent on port {} after reload wait",
                        record.port
                    ));
                    return Ok(self.adopt(conn, record.pid));
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                }
            }
        }
    }

    /// Forget the current session (used by tests and on process exit).
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
        self.state = ConnState::Disconnected;
    }

    #[cfg(test)]
    pub(crate) fn set_cached(&mut self, pid: Option<u32>, port: Option<u16>) {
        self.cached_pid = pid;
        self.last_port = port;
    }
}
