//! In-host agent server
//!
//! Loopback TCP listener with one background accept thread and one reader
//! thread per client. Requests are handled on one of two lanes:
//!
//! - background: executed inline on the reader thread (`ping`,
//!   `list_tools`, and tools that do not need the main thread)
//! - main-thread: enqueued on an MPSC queue that the host's tick drains
//!
//! Responses go back on the originating stream under a per-stream write
//! lock, so concurrent lanes never interleave bytes of two responses.

use super::registry::ToolRegistry;
use super::tool::HostContext;
use super::waker::WindowWaker;
use crate::wire::{
    decode_request, encode_response, salvage_request_id, InvokeParams, LineBuffer, PingReply,
    Request, Response, CMD_INVOKE_TOOL, CMD_LIST_TOOLS, CMD_PING,
};
use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// A connected client's write half. The mutex is the per-stream write lock.
pub struct ClientStream {
    stream: Mutex<TcpStream>,
}

impl ClientStream {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    /// Serialize and write one response line atomically.
    pub fn write_response(&self, response: &Response) {
        let line = encode_response(response);
        if let Ok(mut stream) = self.stream.lock() {
            let _ = stream.write_all(line.as_bytes());
            let _ = stream.flush();
        }
    }

    fn close(&self) {
        if let Ok(stream) = self.stream.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// A request parked for the host main thread, with its origin stream so the
/// drain can route the response back.
struct MainThreadJob {
    request_id: String,
    tool: String,
    arguments: String,
    stream: Arc<ClientStream>,
}

struct Shared {
    host: Arc<dyn HostContext>,
    registry: Arc<ToolRegistry>,
    waker: Arc<dyn WindowWaker>,
    project_root: PathBuf,
    port: u16,
    queue_tx: Sender<MainThreadJob>,
    queue_rx: Mutex<Receiver<MainThreadJob>>,
    shutting_down: AtomicBool,
    clients: Mutex<Vec<Arc<ClientStream>>>,
}

/// The agent's TCP server. Construct with [`AgentServer::start`]; call
/// [`AgentServer::drain`] from the host main loop once per tick; call
/// [`AgentServer::shutdown`] before teardown (reload or exit).
pub struct AgentServer {
    shared: Arc<Shared>,
}

impl AgentServer {
    /// Bind a dynamic loopback port, write the discovery record, and start
    /// the accept thread. The registry must be complete: it is frozen from
    /// here on.
    pub fn start(
        host: Arc<dyn HostContext>,
        registry: Arc<ToolRegistry>,
        waker: Arc<dyn WindowWaker>,
        project_root: &Path,
    ) -> Result<Self> {
        let listener =
            TcpListener::bind(("127.0.0.1", 0)).context("Failed to bind loopback listener")?;
        let port = listener.local_addr()?.port();

        crate::discovery::write_record(project_root, port)?;

        let (queue_tx, queue_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            host,
            registry,
            waker,
            project_root: project_root.to_path_buf(),
            port,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            shutting_down: AtomicBool::new(false),
            clients: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("hostlink-accept".to_string())
            .spawn(move || accept_loop(listener, accept_shared))
            .context("Failed to spawn accept thread")?;

        crate::logging::info(&format!("Agent listening on 127.0.0.1:{}", port));
        Ok(Self { shared })
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Execute every currently-queued main-thread request. Must be called
    /// from the host main thread. Returns the number serviced.
    pub fn drain(&self) -> usize {
        let mut serviced = 0;

        loop {
            let job = {
                let rx = match self.shared.queue_rx.lock() {
                    Ok(rx) => rx,
                    Err(_) => return serviced,
                };
                match rx.try_recv() {
                    Ok(job) => job,
                    Err(_) => break,
                }
            };

            let response = self.shared.registry.invoke(
                self.shared.host.as_ref(),
                &job.request_id,
                &job.tool,
                &job.arguments,
            );
            job.stream.write_response(&response);
            serviced += 1;
        }

        if serviced > 0 && self.shared.waker.should_restore() {
            self.shared.waker.restore_minimized_state();
        }

        serviced
    }

    /// Stop accepting, fail queued main-thread work with a shutdown error,
    /// close every client stream, and remove the discovery record.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Poke the accept thread out of its blocking accept.
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.shared.port));
        let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(200));

        if let Ok(rx) = self.shared.queue_rx.lock() {
            while let Ok(job) = rx.try_recv() {
                job.stream
                    .write_response(&Response::failure(&job.request_id, "Agent shutting down"));
            }
        }

        if let Ok(mut clients) = self.shared.clients.lock() {
            for client in clients.drain(..) {
                client.close();
            }
        }

        crate::discovery::delete_record(&self.shared.project_root);
        crate::logging::info(&format!("Agent on port {} shut down", self.shared.port));
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break;
                }

                let reader = match stream.try_clone() {
                    Ok(r) => r,
                    Err(e) => {
                        crate::logging::warn(&format!("Failed to clone client stream: {}", e));
                        continue;
                    }
                };

                let client = Arc::new(ClientStream::new(stream));
                if let Ok(mut clients) = shared.clients.lock() {
                    clients.push(Arc::clone(&client));
                }

                let conn_shared = Arc::clone(&shared);
                let spawned = std::thread::Builder::new()
                    .name("hostlink-reader".to_string())
                    .spawn(move || reader_loop(reader, client, conn_shared));
                if let Err(e) = spawned {
                    crate::logging::error(&format!("Failed to spawn reader thread: {}", e));
                }
            }
            Err(e) => {
                if shared.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                crate::logging::warn(&format!("Accept error: {}", e));
            }
        }
    }
}

fn reader_loop(mut stream: TcpStream, client: Arc<ClientStream>, shared: Arc<Shared>) {
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 4096];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    handle_line(&line, &client, &shared);
                }
            }
            Err(e) => {
                if !shared.shutting_down.load(Ordering::SeqCst) {
                    crate::logging::debug(&format!("Reader exiting: {}", e));
                }
                break;
            }
        }
    }

    if let Ok(mut clients) = shared.clients.lock() {
        clients.retain(|c| !Arc::ptr_eq(c, &client));
    }
}

fn handle_line(line: &str, client: &Arc<ClientStream>, shared: &Arc<Shared>) {
    let request = match decode_request(line) {
        Ok(r) => r,
        Err(e) => {
            let id = salvage_request_id(line);
            client.write_response(&Response::failure(id, format!("Malformed request: {}", e)));
            return;
        }
    };

    match request.cmd.as_str() {
        CMD_PING => client.write_response(&handle_ping(&request, shared)),
        CMD_LIST_TOOLS => client.write_response(&handle_list_tools(&request, shared)),
        CMD_INVOKE_TOOL => handle_invoke(request, client, shared),
        other => {
            client.write_response(&Response::failure(
                &request.id,
                format!("Unknown command: {}", other),
            ));
        }
    }
}

/// Always background-lane: must answer while the host is minimized.
fn handle_ping(request: &Request, shared: &Arc<Shared>) -> Response {
    let reply = PingReply {
        status: "ok".to_string(),
        host_version: shared.host.host_version(),
        project_name: shared.host.project_name(),
    };
    match serde_json::to_string(&reply) {
        Ok(data) => Response::success(&request.id, data),
        Err(e) => Response::failure(&request.id, format!("Failed to encode ping reply: {}", e)),
    }
}

fn handle_list_tools(request: &Request, shared: &Arc<Shared>) -> Response {
    match serde_json::to_string(&shared.registry.catalog()) {
        Ok(data) => Response::success(&request.id, data),
        Err(e) => Response::failure(&request.id, format!("Failed to encode catalog: {}", e)),
    }
}

fn handle_invoke(request: Request, client: &Arc<ClientStream>, shared: &Arc<Shared>) {
    let params: InvokeParams = match serde_json::from_str(&request.params) {
        Ok(p) => p,
        Err(e) => {
            client.write_response(&Response::failure(
                &request.id,
                format!("Malformed invoke_tool parameters: {}", e),
            ));
            return;
        }
    };

    // Unknown tools are handled on the background lane so the error
    // response is immediate.
    let Some(tool) = shared.registry.get(&params.tool) else {
        client.write_response(&Response::failure(
            &request.id,
            format!("Unknown tool: {}", params.tool),
        ));
        return;
    };

    if tool.requires_main_thread() {
        let job = MainThreadJob {
            request_id: request.id.clone(),
            tool: params.tool,
            arguments: params.arguments,
            stream: Arc::clone(client),
        };
        if shared.queue_tx.send(job).is_err() {
            client.write_response(&Response::failure(&request.id, "Agent shutting down"));
            return;
        }
        // Side channel only; never blocks on the main thread itself.
        shared.waker.wake_if_minimized();
    } else {
        let response = shared.registry.invoke(
            shared.host.as_ref(),
            &request.id,
            &params.tool,
            &params.arguments,
        );
        client.write_response(&response);
    }
}
