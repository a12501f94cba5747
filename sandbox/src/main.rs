//! Sandbox service: runs posted Python code in isolated scratch directories.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use analyst::io::subprocess::SubprocessBackend;
use analyst::logging;
use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "analyst-sandbox")]
#[command(about = "HTTP service that executes analysis code in per-request scratch directories")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "5000")]
    port: u16,

    /// Root under which per-request scratch directories are created
    #[arg(long, default_value = "/tmp/runspace")]
    run_dir: PathBuf,

    /// Wall-clock limit per job in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Interpreter invocation; the script name is appended
    #[arg(long, num_args = 1.., default_values_t = vec!["python3".to_string()])]
    interpreter: Vec<String>,

    /// Directory submitted code reads input data from
    #[arg(long, default_value = "/app/data")]
    data_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_with_default("analyst=info,analyst_sandbox=info,tower_http=info");

    let args = Args::parse();
    if args.timeout_secs == 0 {
        bail!("--timeout-secs must be > 0");
    }
    std::fs::create_dir_all(&args.run_dir)
        .with_context(|| format!("create run dir {}", args.run_dir.display()))?;

    let backend = SubprocessBackend::new(&args.run_dir, args.interpreter.clone(), args.data_dir.clone());
    let state = AppState::new(backend, Duration::from_secs(args.timeout_secs));
    info!(
        run_dir = %args.run_dir.display(),
        interpreter = ?args.interpreter,
        timeout_secs = args.timeout_secs,
        "starting analyst-sandbox"
    );

    let app = routes::router(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
