use anyhow::Result;
use clap::{Parser, Subcommand};
use hostlink::{broker, discovery, host, logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hostlink")]
#[command(version)]
#[command(about = "Bridge an interactive editor host to MCP agents over loopback TCP")]
struct Args {
    /// Project directory (defaults to the current working directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the MCP broker (stdio JSON-RPC; launched by an agent framework)
    Broker,

    /// Run the demo host that embeds the agent (for development and tests)
    Host,
}

fn main() {
    logging::init();
    logging::cleanup_old_logs();

    let args = Args::parse();

    if let Err(e) = run(args) {
        logging::error(&format!("{:?}", e));
        eprintln!("hostlink: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let start_dir = match args.project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match args.command {
        Command::Broker => {
            logging::info("Broker starting");
            let project_root = discovery::find_project_root(&start_dir).ok_or_else(|| {
                anyhow::anyhow!(
                    "No project root (directory containing Library/) at or above {}",
                    start_dir.display()
                )
            })?;

            // Single-threaded cooperative event loop; all broker I/O is
            // non-blocking.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(broker::stdio::serve(project_root))
        }
        Command::Host => {
            logging::info("Demo host starting");
            host::run(start_dir)
        }
    }
}
