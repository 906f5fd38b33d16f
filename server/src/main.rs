use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::{BoxError, Server};
use server::state::{self, ServerState};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::SERVER_PORT)]
    port: u16,

    /// Number of worker threads
    #[arg(short, long, default_value = "16")]
    workers: usize,

    /// Connections polled by one worker
    #[arg(short = 'c', long, default_value = "8")]
    per_worker: usize,

    /// Pause between sweeps in milliseconds
    #[arg(long, default_value = "100")]
    sweep_ms: u64,

    /// Read/write timeout for one packet in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Directory holding the user list and the scoreboard
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let bind_addr = SocketAddr::new(args.host.parse::<IpAddr>()?, args.port);
    let config = ServerConfig {
        bind_addr,
        workers: args.workers.max(1),
        connections_per_worker: args.per_worker.max(1),
        sweep_interval: Duration::from_millis(args.sweep_ms),
        io_timeout: Duration::from_millis(args.timeout_ms.max(1)),
        data_dir: args.data_dir,
        ..ServerConfig::default()
    };

    let users_path = config.users_path();
    let scoreboard_path = config.scoreboard_path();
    let initial = ServerState::load(&users_path, &scoreboard_path)?;

    let server = Server::bind(config, initial.into_shared()).await?;
    let shared = server.state();

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        })
        .await?;

    state::lock(&shared).save(&users_path, &scoreboard_path)?;
    Ok(())
}
