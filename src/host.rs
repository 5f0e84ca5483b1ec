//! Demo host: a stand-in editor embedding the agent
//!
//! Implements `HostContext` with an in-memory console ring and a scripted
//! menu, ticks the agent drain from a simulated main loop, and performs a
//! real reload (agent teardown + fresh start, same process, new port) when
//! `Assets/Refresh` runs. The e2e tests embed the same harness.

use crate::agent::tool::{ConsoleEntry, HostContext, LogSeverity};
use crate::agent::waker::HookWaker;
use crate::agent::Agent;
use anyhow::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOG_RING_CAP: usize = 1_000;
const TICK: Duration = Duration::from_millis(16);

/// Set by the SIGINT/SIGTERM handler; the main loop turns it into a clean
/// shutdown so the discovery record never outlives the agent.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_termination_signal(_sig: libc::c_int) {
    SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_signal_handlers() {
    let handler = on_termination_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

pub struct DemoHost {
    project_name: String,
    project_root: PathBuf,
    version: String,
    logs: Mutex<VecDeque<ConsoleEntry>>,
    executed_menus: Mutex<Vec<String>>,
    minimized: AtomicBool,
    reload_requested: AtomicBool,
}

impl DemoHost {
    pub fn new(project_root: &Path, project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            project_root: project_root.to_path_buf(),
            version: format!("demo-{}", env!("CARGO_PKG_VERSION")),
            logs: Mutex::new(VecDeque::new()),
            executed_menus: Mutex::new(Vec::new()),
            minimized: AtomicBool::new(false),
            reload_requested: AtomicBool::new(false),
        }
    }

    pub fn push_log(&self, severity: LogSeverity, message: &str) {
        let entry = ConsoleEntry {
            severity,
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        if let Ok(mut logs) = self.logs.lock() {
            if logs.len() >= LOG_RING_CAP {
                logs.pop_front();
            }
            logs.push_back(entry);
        }
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.minimized.store(minimized, Ordering::SeqCst);
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized.load(Ordering::SeqCst)
    }

    /// Menu paths executed so far, in execution order.
    pub fn executed_menu_items(&self) -> Vec<String> {
        self.executed_menus
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Consume a pending reload request, if any.
    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::SeqCst)
    }
}

impl HostContext for DemoHost {
    fn host_version(&self) -> String {
        self.version.clone()
    }

    fn project_name(&self) -> String {
        self.project_name.clone()
    }

    fn project_path(&self) -> PathBuf {
        self.project_root.clone()
    }

    fn recent_logs(&self, max: usize, severity: Option<LogSeverity>) -> Vec<ConsoleEntry> {
        let Ok(logs) = self.logs.lock() else {
            return Vec::new();
        };
        let matching: Vec<ConsoleEntry> = logs
            .iter()
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(max);
        matching.into_iter().skip(skip).collect()
    }

    fn execute_menu_item(&self, path: &str) -> Result<String> {
        let detail = match path {
            "Assets/Refresh" | "Assets/Reimport All" => {
                self.reload_requested.store(true, Ordering::SeqCst);
                "asset refresh queued; host will reload".to_string()
            }
            "Window/Minimize" => {
                self.set_minimized(true);
                "window minimized".to_string()
            }
            "Window/Restore" => {
                self.set_minimized(false);
                "window restored".to_string()
            }
            "Help/About" => format!("{} ({})", self.project_name, self.version),
            _ => anyhow::bail!("No menu item at '{}'", path),
        };

        if let Ok(mut executed) = self.executed_menus.lock() {
            executed.push(path.to_string());
        }
        self.push_log(LogSeverity::Info, &format!("Executed menu item {}", path));
        Ok(detail)
    }
}

enum Command {
    Quit,
    Minimize,
    Restore,
    Reload,
    Log(String),
    Status,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "quit" | "exit" => Some(Command::Quit),
        "minimize" => Some(Command::Minimize),
        "restore" => Some(Command::Restore),
        "reload" => Some(Command::Reload),
        "status" => Some(Command::Status),
        _ => line.strip_prefix("log ").map(|m| Command::Log(m.to_string())),
    }
}

/// Run the interactive demo host until `quit` or stdin EOF.
///
/// Commands on stdin: `minimize`, `restore`, `reload`, `log <msg>`,
/// `status`, `quit`.
pub fn run(project_root: PathBuf) -> Result<()> {
    install_signal_handlers();
    crate::storage::ensure_dir(&project_root.join(crate::discovery::DISCOVERY_DIR))?;

    let project_name = project_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "DemoProject".to_string());

    let host = Arc::new(DemoHost::new(&project_root, &project_name));
    host.push_log(LogSeverity::Info, "Demo host starting");

    let waker_host = Arc::clone(&host);
    let waker = Arc::new(HookWaker::new(move || waker_host.is_minimized()));

    let mut agent = Agent::start(
        Arc::clone(&host) as Arc<dyn HostContext>,
        waker.clone(),
        &project_root,
    )?;
    eprintln!(
        "Demo host '{}' up; agent on port {}",
        project_name,
        agent.port()
    );

    // Stdin watcher; the main loop below is the simulated editor main
    // thread and must never block on input.
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match std::io::BufRead::read_line(&mut stdin.lock(), &mut line) {
                Ok(0) => {
                    let _ = cmd_tx.send(Command::Quit);
                    break;
                }
                Ok(_) => {
                    if let Some(cmd) = parse_command(&line) {
                        if cmd_tx.send(cmd).is_err() {
                            break;
                        }
                    }
                }
                Err(_) => {
                    let _ = cmd_tx.send(Command::Quit);
                    break;
                }
            }
        }
    });

    loop {
        agent.drain();

        if SHUTDOWN_FLAG.load(Ordering::SeqCst) {
            agent.shutdown();
            eprintln!("Demo host exiting on signal");
            return Ok(());
        }

        if host.take_reload_request() {
            eprintln!("Reloading host scripts...");
            agent.shutdown();
            agent = Agent::start(
                Arc::clone(&host) as Arc<dyn HostContext>,
                waker.clone(),
                &project_root,
            )?;
            host.push_log(LogSeverity::Info, "Reload complete");
            eprintln!("Reload complete; agent on port {}", agent.port());
        }

        match cmd_rx.try_recv() {
            Ok(Command::Quit) => {
                agent.shutdown();
                eprintln!("Demo host exiting");
                return Ok(());
            }
            Ok(Command::Minimize) => {
                host.set_minimized(true);
                eprintln!("(window minimized)");
            }
            Ok(Command::Restore) => {
                host.set_minimized(false);
                eprintln!("(window restored)");
            }
            Ok(Command::Reload) => {
                host.reload_requested.store(true, Ordering::SeqCst);
            }
            Ok(Command::Log(message)) => {
                host.push_log(LogSeverity::Info, &message);
            }
            Ok(Command::Status) => {
                eprintln!(
                    "port={} minimized={} logs={}",
                    agent.port(),
                    host.is_minimized(),
                    host.recent_logs(usize::MAX, None).len()
                );
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                agent.shutdown();
                return Ok(());
            }
        }

        std::thread::sleep(TICK);
    }
}
