//! Broker-side TCP session to the in-host agent
//!
//! Framed request/response over newline-delimited JSON with correlation by
//! id. Responses can arrive in any order; FIFO is never assumed. A reader
//! task dispatches incoming lines to pending waiters; a writer task owns
//! the write half so the single-threaded event loop serializes sends.

use crate::config::config;
use crate::wire::{
    decode_response, encode_request, InvokeParams, PingReply, Request, Response, CMD_INVOKE_TOOL,
    CMD_LIST_TOOLS, CMD_PING,
};
use crate::schema::ToolCatalog;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

/// Process-wide counter feeding request ids.
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// A request id unique across the broker process lifetime; the random
/// suffix keeps two broker processes distinguishable in host logs.
fn new_request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::SeqCst);
    let suffix: u32 = rand::random();
    format!("req_{}_{:08x}", seq, suffix)
}

pub struct AgentConnection {
    port: u16,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>,
    writer_tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
    closed_rx: watch::Receiver<bool>,
}

impl AgentConnection {
    /// Connect to the agent and gate on a ping. A connection whose first
    /// ping does not succeed within the ping timeout is surfaced as a
    /// failure, not returned half-open.
    pub async fn connect(port: u16) -> Result<(Self, PingReply)> {
        let stream = tokio::time::timeout(
            config().ping_timeout(),
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await
        .context("Connect timed out")?
        .with_context(|| format!("Failed to connect to agent on port {}", port))?;

        let (read_half, mut write_half) = stream.into_split();

        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (closed_tx, closed_rx) = watch::channel(false);
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(32);

        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match decode_response(trimmed) {
                            Ok(response) => {
                                let waiter = reader_pending.lock().await.remove(&response.id);
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(response);
                                    }
                                    None => {
                                        // Late arrival after a timeout, or a
                                        // response we never asked for.
                                        crate::logging::debug(&format!(
                                            "Discarding unmatched response id={}",
                                            response.id
                                        ));
                                    }
                                }
                            }
                            Err(e) => {
                                crate::logging::warn(&format!(
                                    "Undecodable line from agent: {}",
                                    e
                                ));
                            }
                        }
                    }
                    Err(e) => {
                        crate::logging::debug(&format!("Agent socket read error: {}", e));
                        break;
                    }
                }
            }

            // Socket gone: fail every waiter and notify subscribers.
            reader_closed.store(true, Ordering::SeqCst);
            let _ = closed_tx.send(true);
            let mut pending = reader_pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Response::failure("", "Connection closed"));
            }
        });

        let conn = Self {
            port,
            pending,
            writer_tx,
            closed,
            closed_rx,
        };

        let reply = conn.ping().await.context("Agent did not answer ping")?;
        Ok((conn, reply))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Watch that flips to `true` when the socket drops; the reconnect
    /// controller subscribes to this.
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Send one request and wait for its response, failing the waiter no
    /// later than `timeout`.
    pub async fn request_with_timeout(
        &self,
        cmd: &str,
        params: String,
        timeout: Duration,
    ) -> Result<Response> {
        if self.is_closed() {
            anyhow::bail!("Connection closed");
        }

        let id = new_request_id();
        let request = Request::new(id.clone(), cmd, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let line = encode_request(&request);
        if self.writer_tx.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            anyhow::bail!("Connection closed");
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if response.id.is_empty() {
                    // sentinel injected when the socket dropped mid-flight
                    anyhow::bail!("Connection closed");
                }
                Ok(response)
            }
            Ok(Err(_)) => anyhow::bail!("Connection closed"),
            Err(_) => {
                // Timed out: remove the entry so a late response is
                // discarded by the reader instead of delivered.
                self.pending.lock().await.remove(&id);
                anyhow::bail!("Request '{}' timed out after {:?}", cmd, timeout)
            }
        }
    }

    pub async fn request(&self, cmd: &str, params: String) -> Result<Response> {
        self.request_with_timeout(cmd, params, config().request_timeout())
            .await
    }

    /// Liveness probe with the short ping timeout; never touches the host
    /// main loop on the agent side.
    pub async fn ping(&self) -> Result<PingReply> {
        let response = self
            .request_with_timeout(CMD_PING, String::new(), config().ping_timeout())
            .await?;
        if !response.ok {
            anyhow::bail!("Ping failed: {}", response.error);
        }
        let reply: PingReply =
            serde_json::from_str(&response.data).context("Malformed ping reply")?;
        Ok(reply)
    }

    pub async fn list_tools(&self) -> Result<ToolCatalog> {
        let response = self.request(CMD_LIST_TOOLS, String::new()).await?;
        if !response.ok {
            anyhow::bail!("list_tools failed: {}", response.error);
        }
        let catalog: ToolCatalog =
            serde_json::from_str(&response.data).context("Malformed tool catalog")?;
        Ok(catalog)
    }

    /// Invoke a tool. The returned envelope may carry `ok=false`; callers
    /// translate that into their own failure surface.
    pub async fn invoke_tool(&self, tool: &str, arguments_json: &str) -> Result<Response> {
        let params = InvokeParams {
            tool: tool.to_string(),
            arguments: arguments_json.to_string(),
        };
        let params_json = serde_json::to_string(&params)?;
        self.request(CMD_INVOKE_TOOL, params_json).await
    }

    /// Drop the session: every pending waiter is failed with a
    /// connection-closed error.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Response::failure("", "Connection closed"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req_"));
    }
}
