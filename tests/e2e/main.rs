//! End-to-end tests: a real agent on a loopback port driven by a real
//! broker connection, all in one process.
//!
//! The demo host stands in for the editor; a ticker thread stands in for
//! the host main loop, calling the drain the way the host's tick would.

use anyhow::Result;
use hostlink::agent::tool::{HostContext, HostTool, ToolContext};
use hostlink::agent::waker::HookWaker;
use hostlink::agent::Agent;
use hostlink::broker::connection::AgentConnection;
use hostlink::broker::reconnect::ConnectionKeeper;
use hostlink::broker::surface::{translate_descriptor, ToolSurface};
use hostlink::discovery;
use hostlink::host::DemoHost;
use hostlink::wire::{decode_response, Request};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn temp_project(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("hostlink-e2e-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(root.join(discovery::DISCOVERY_DIR)).unwrap();
    root
}

type TestWaker = HookWaker<Box<dyn Fn() -> bool + Send + Sync>>;

fn start_host(root: &PathBuf) -> (Arc<DemoHost>, Arc<TestWaker>, Agent) {
    let host = Arc::new(DemoHost::new(root, "E2EProject"));
    let waker_host = Arc::clone(&host);
    let probe: Box<dyn Fn() -> bool + Send + Sync> =
        Box::new(move || waker_host.is_minimized());
    let waker = Arc::new(HookWaker::new(probe));
    let agent = Agent::start(
        Arc::clone(&host) as Arc<dyn HostContext>,
        waker.clone(),
        root,
    )
    .unwrap();
    (host, waker, agent)
}

/// Simulated host main loop: drains the agent every few milliseconds until
/// dropped.
struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Ticker {
    fn start(agent: Arc<Agent>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                agent.drain();
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// --- S1/S2: ping and list_tools over a fresh connection ---

#[tokio::test]
async fn test_ping_round_trip() -> Result<()> {
    let root = temp_project("ping");
    let (_host, _waker, agent) = start_host(&root);

    let (conn, reply) = AgentConnection::connect(agent.port()).await?;
    assert_eq!(reply.status, "ok");
    assert_eq!(reply.project_name, "E2EProject");
    assert!(!reply.host_version.is_empty());

    // ping works with no drain running: it never touches the main loop
    let again = conn.ping().await?;
    assert_eq!(again.status, "ok");

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn test_list_tools_catalog() -> Result<()> {
    let root = temp_project("list");
    let (_host, _waker, agent) = start_host(&root);

    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    let catalog = conn.list_tools().await?;

    assert!(catalog.version >= 1);
    assert_eq!(catalog.tools.len(), 3);
    for tool in &catalog.tools {
        assert!(!tool.name.is_empty());
        let schema = tool.schema_value().expect("parameterSchema must parse");
        assert_eq!(schema["type"], "object");
    }

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- S3/S4: invocation error paths ---

#[tokio::test]
async fn test_invoke_unknown_tool() -> Result<()> {
    let root = temp_project("unknown-tool");
    let (_host, _waker, agent) = start_host(&root);

    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    // no ticker: unknown tools error on the background lane immediately
    let response = conn.invoke_tool("nope", "{}").await?;
    assert!(!response.ok);
    assert!(response.error.contains("nope"));
    assert!(response.data.is_empty());

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn test_invoke_missing_required_argument() -> Result<()> {
    let root = temp_project("bad-args");
    let (_host, _waker, agent) = start_host(&root);
    let agent = Arc::new(agent);
    let _ticker = Ticker::start(Arc::clone(&agent));

    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    let response = conn.invoke_tool("execute_menu_item", "{}").await?;
    assert!(!response.ok);
    assert!(response.error.contains("path"));

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[tokio::test]
async fn test_malformed_request_line_gets_error_response() -> Result<()> {
    let root = temp_project("malformed");
    let (_host, _waker, agent) = start_host(&root);

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", agent.port())).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"this is not json\n").await?;
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let response = decode_response(line.trim())?;
    assert!(!response.ok);
    assert_eq!(response.id, "unknown");

    // best-effort id recovery when the envelope is wrong but carries an id
    write_half
        .write_all(b"{\"id\":\"x1\",\"cmd\":12}\n")
        .await?;
    line.clear();
    reader.read_line(&mut line).await?;
    let response = decode_response(line.trim())?;
    assert!(!response.ok);
    assert_eq!(response.id, "x1");

    // unknown command
    let req = Request::new("x2", "frobnicate", "");
    write_half
        .write_all(hostlink::wire::encode_request(&req).as_bytes())
        .await?;
    line.clear();
    reader.read_line(&mut line).await?;
    let response = decode_response(line.trim())?;
    assert_eq!(response.id, "x2");
    assert!(response.error.contains("frobnicate"));

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Properties 1 & 2: round-trip and write atomicity under concurrency ---

#[tokio::test]
async fn test_concurrent_requests_one_response_each_no_interleaving() -> Result<()> {
    let root = temp_project("atomicity");
    let (_host, _waker, agent) = start_host(&root);
    let agent = Arc::new(agent);
    let _ticker = Ticker::start(Arc::clone(&agent));

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", agent.port())).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // a main-thread-lane call (answered by the drain thread) sandwiched
    // between background pings (answered by the reader thread), so two OS
    // threads write to the same stream concurrently
    let mut expected = Vec::new();
    let mut batch = String::new();
    for i in 0..20 {
        let id = format!("ping-{}", i);
        batch.push_str(&hostlink::wire::encode_request(&Request::new(
            &id,
            "ping",
            "",
        )));
        expected.push(id);
        if i == 10 {
            let params = json!({
                "tool": "get_project_info",
                "arguments": "{}"
            });
            batch.push_str(&hostlink::wire::encode_request(&Request::new(
                "main-1",
                "invoke_tool",
                params.to_string(),
            )));
            expected.push("main-1".to_string());
        }
    }
    write_half.write_all(batch.as_bytes()).await?;

    let mut seen = Vec::new();
    let mut line = String::new();
    for _ in 0..expected.len() {
        line.clear();
        reader.read_line(&mut line).await?;
        // every line individually parses: no byte of one response ever
        // lands inside another
        let response = decode_response(line.trim())?;
        assert!(response.ok, "unexpected failure: {}", response.error);
        seen.push(response.id);
    }

    expected.sort();
    seen.sort();
    assert_eq!(seen, expected);

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 3: main-thread queue is FIFO within one reader ---

#[tokio::test]
async fn test_main_thread_lane_fifo() -> Result<()> {
    let root = temp_project("fifo");
    let (host, _waker, agent) = start_host(&root);
    let agent = Arc::new(agent);
    let _ticker = Ticker::start(Arc::clone(&agent));

    let (conn, _) = AgentConnection::connect(agent.port()).await?;

    let first = conn.invoke_tool("execute_menu_item", r#"{"path":"Help/About"}"#);
    let second = conn.invoke_tool("execute_menu_item", r#"{"path":"Window/Restore"}"#);
    let (r1, r2) = tokio::join!(first, second);
    assert!(r1?.ok);
    assert!(r2?.ok);

    assert_eq!(
        host.executed_menu_items(),
        vec!["Help/About".to_string(), "Window/Restore".to_string()]
    );

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 4: a long main-thread call never blocks a ping ---

struct SlowMainThreadTool;

impl HostTool for SlowMainThreadTool {
    fn name(&self) -> &str {
        "slow_main_thread_op"
    }
    fn description(&self) -> &str {
        "Sleeps on the main thread"
    }
    fn requires_main_thread(&self) -> bool {
        true
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    fn execute(&self, _host: &dyn HostContext, _ctx: ToolContext, _args: Value) -> Result<Value> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(json!({"slept": true}))
    }
}

#[tokio::test]
async fn test_lane_independence() -> Result<()> {
    let root = temp_project("lanes");
    let host = Arc::new(DemoHost::new(&root, "E2EProject"));
    let waker = Arc::new(HookWaker::new(|| false));

    let mut tools = hostlink::agent::tools::builtin_tools();
    tools.push(Arc::new(SlowMainThreadTool));
    let agent = Arc::new(Agent::start_with_tools(
        Arc::clone(&host) as Arc<dyn HostContext>,
        waker,
        &root,
        tools,
    )?);
    let _ticker = Ticker::start(Arc::clone(&agent));

    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    let conn = Arc::new(conn);

    let slow_conn = Arc::clone(&conn);
    let started = Instant::now();
    let slow = tokio::spawn(async move {
        slow_conn.invoke_tool("slow_main_thread_op", "{}").await
    });

    // give the reader a moment to enqueue the slow job
    tokio::time::sleep(Duration::from_millis(50)).await;

    conn.ping().await?;
    let ping_done = started.elapsed();
    assert!(
        ping_done < Duration::from_millis(450),
        "ping waited for the slow main-thread call: {:?}",
        ping_done
    );

    let slow_response = slow.await??;
    assert!(slow_response.ok);
    assert!(started.elapsed() >= Duration::from_millis(500));

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 5: discovery record lifecycle ---

#[tokio::test]
async fn test_discovery_record_consistency() -> Result<()> {
    let root = temp_project("record");
    let (_host, _waker, agent) = start_host(&root);

    let record = discovery::read_record(&root)?;
    assert_eq!(record.port, agent.port());
    assert_eq!(record.pid, std::process::id());
    assert_eq!(record.project_path, root.to_string_lossy());

    agent.shutdown();
    assert!(!discovery::discovery_path(&root).exists());

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 6 / S5: reload bumps the catalog version ---

#[tokio::test]
async fn test_tool_version_increases_across_reload() -> Result<()> {
    let root = temp_project("version");
    let (host, waker, agent) = start_host(&root);

    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    let before = conn.list_tools().await?.version;

    // reload: same process, new agent, new port
    agent.shutdown();
    let agent2 = Agent::start(
        Arc::clone(&host) as Arc<dyn HostContext>,
        waker.clone(),
        &root,
    )?;

    let (conn2, _) = AgentConnection::connect(agent2.port()).await?;
    let after = conn2.list_tools().await?.version;
    assert!(after > before);

    agent2.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 9: request timeout fires when a response never comes ---

#[tokio::test]
async fn test_request_timeout() -> Result<()> {
    // A fake agent that answers pings and swallows everything else.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let Ok(req) = hostlink::wire::decode_request(line.trim()) else {
                        continue;
                    };
                    if req.cmd == "ping" {
                        let data = json!({
                            "status": "ok", "hostVersion": "fake", "projectName": "fake"
                        });
                        let resp =
                            hostlink::wire::Response::success(&req.id, data.to_string());
                        let _ = write_half
                            .write_all(hostlink::wire::encode_response(&resp).as_bytes())
                            .await;
                    }
                    // all other commands: never respond
                }
            }
        }
    });

    let (conn, _) = AgentConnection::connect(port).await?;

    let started = Instant::now();
    let err = conn
        .request_with_timeout("list_tools", String::new(), Duration::from_millis(300))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.to_string().contains("timed out"));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2));
    Ok(())
}

// --- Property 7: reconnect after shutdown + fresh agent (no reload hint) ---

#[tokio::test]
async fn test_ensure_connection_recovers_without_reload_hint() -> Result<()> {
    let root = temp_project("reconnect");
    let (host, waker, agent) = start_host(&root);

    let mut keeper = ConnectionKeeper::new(root.clone());
    let first = keeper.ensure_connection(false).await?;
    assert!(first.reconnected);
    let old_port = first.conn.port();
    let before = first.conn.list_tools().await?.version;

    // the agent goes away; a fresh one comes up shortly after on a new port
    agent.shutdown();
    let reload_host = Arc::clone(&host);
    let reload_waker = waker.clone();
    let reload_root = root.clone();
    let restart = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(700));
        Agent::start(
            reload_host as Arc<dyn HostContext>,
            reload_waker,
            &reload_root,
        )
        .unwrap()
    });

    let ensured = keeper.ensure_connection(false).await?;
    assert!(ensured.reconnected);
    assert_ne!(ensured.conn.port(), old_port);
    let after = ensured.conn.list_tools().await?.version;
    assert!(after > before);

    let agent2 = restart.join().unwrap();
    assert_eq!(ensured.conn.port(), agent2.port());

    agent2.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 8: expecting_reload never returns the pre-reload server ---

#[tokio::test]
async fn test_expecting_reload_rejects_stale_server() -> Result<()> {
    let root = temp_project("expect-reload");
    let (host, waker, agent) = start_host(&root);
    let old_port = agent.port();

    let mut keeper = ConnectionKeeper::new(root.clone());
    keeper.ensure_connection(false).await?;

    // the pre-reload server stays reachable for a while after the
    // triggering call; the reload happens in the background
    let reload_host = Arc::clone(&host);
    let reload_waker = waker.clone();
    let reload_root = root.clone();
    let restart = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(1_200));
        agent.shutdown();
        Agent::start(
            reload_host as Arc<dyn HostContext>,
            reload_waker,
            &reload_root,
        )
        .unwrap()
    });

    let ensured = keeper.ensure_connection(true).await?;
    assert_ne!(
        ensured.conn.port(),
        old_port,
        "must never latch onto the pre-reload server"
    );
    assert!(ensured.conn.ping().await.is_ok());

    let agent2 = restart.join().unwrap();
    assert_eq!(ensured.conn.port(), agent2.port());

    agent2.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Property 10: schema translation preserves everything ---

#[tokio::test]
async fn test_translated_schemas_preserve_constraints() -> Result<()> {
    let root = temp_project("schemas");
    let (_host, _waker, agent) = start_host(&root);

    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    let catalog = conn.list_tools().await?;

    for descriptor in &catalog.tools {
        let tool = translate_descriptor(descriptor)?;
        assert_eq!(tool.name, descriptor.name);
        assert_eq!(tool.description, descriptor.description);
    }

    let logs = catalog
        .tools
        .iter()
        .find(|t| t.name == "read_console_logs")
        .expect("read_console_logs registered");
    let translated = translate_descriptor(logs)?.input_schema;
    assert_eq!(translated["properties"]["max_entries"]["minimum"], 1);
    assert_eq!(translated["properties"]["max_entries"]["maximum"], 500);
    assert_eq!(translated["properties"]["max_entries"]["default"], 50);
    assert_eq!(
        translated["properties"]["severity"]["enum"],
        json!(["info", "warning", "error"])
    );

    let menu = catalog
        .tools
        .iter()
        .find(|t| t.name == "execute_menu_item")
        .expect("execute_menu_item registered");
    assert!(menu.requires_main_thread);
    let translated = translate_descriptor(menu)?.input_schema;
    assert_eq!(translated["required"][0], "path");
    assert!(translated["properties"]["path"]["description"]
        .as_str()
        .is_some());

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- Tool surface over a live agent ---

#[tokio::test]
async fn test_surface_registers_and_proxies() -> Result<()> {
    let root = temp_project("surface");
    let (host, _waker, agent) = start_host(&root);
    let agent = Arc::new(agent);
    let _ticker = Ticker::start(Arc::clone(&agent));

    host.push_log(hostlink::agent::tool::LogSeverity::Error, "boom in scene");

    let surface = ToolSurface::new(root.clone());
    let tools = surface.refresh().await?;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["execute_menu_item", "get_project_info", "read_console_logs"]
    );

    // second refresh with an unchanged version keeps the same registrations
    let again = surface.refresh().await?;
    assert_eq!(again.len(), tools.len());

    let outcome = surface
        .call("read_console_logs", &json!({"severity": "error"}))
        .await?;
    assert!(!outcome.is_error);
    let structured = outcome.structured.expect("parseable data passes through");
    assert_eq!(structured["count"], 1);
    assert_eq!(structured["entries"][0]["message"], "boom in scene");

    let outcome = surface.call("get_project_info", &json!({})).await?;
    assert!(!outcome.is_error);
    let info = outcome.structured.expect("structured");
    assert_eq!(info["projectName"], "E2EProject");
    assert_eq!(info["toolCount"], 3);

    // inner tool failures surface as failed results, not transport errors
    let outcome = surface
        .call("execute_menu_item", &json!({"path": "Bogus/Item"}))
        .await?;
    assert!(outcome.is_error);
    assert!(outcome.text.contains("Bogus/Item"));

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

// --- S6: minimized host is woken, serviced, and re-minimized ---

#[tokio::test]
async fn test_minimized_host_is_woken_for_main_thread_work() -> Result<()> {
    let root = temp_project("minimized");
    let (host, waker, agent) = start_host(&root);
    let agent = Arc::new(agent);

    host.set_minimized(true);

    // ping works while minimized with no drain at all
    let (conn, _) = AgentConnection::connect(agent.port()).await?;
    conn.ping().await?;
    assert_eq!(waker.wake_count(), 0);

    let _ticker = Ticker::start(Arc::clone(&agent));

    let started = Instant::now();
    let response = conn.invoke_tool("get_project_info", "{}").await?;
    assert!(response.ok);

    // The reader prods the window per queued request and the drain
    // re-minimizes after servicing; keep the main-thread lane busy until
    // both sides have been observed.
    let deadline = Instant::now() + Duration::from_secs(2);
    while (waker.wake_count() == 0 || waker.restore_count() == 0) && Instant::now() < deadline {
        conn.invoke_tool("get_project_info", "{}").await?;
    }
    let woken_for = started.elapsed();
    assert!(waker.wake_count() >= 1, "reader must prod the window");
    assert!(waker.restore_count() >= 1, "drain must re-minimize");
    assert!(
        woken_for < Duration::from_secs(2),
        "restored window time not bounded: {:?}",
        woken_for
    );

    agent.shutdown();
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}
