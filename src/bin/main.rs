use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use stockbridge::bus::CommandBus;
use stockbridge::config::{self, ServerLayer, SettingsLayer, WorkerLayer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// HTTP bridge to a line-protocol stock portfolio worker
#[derive(Parser)]
#[command(name = "stockbridge")]
#[command(version)]
#[command(about = "HTTP bridge to a line-protocol stock portfolio worker")]
struct Cli {
    /// Settings file (overrides the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker executable
    #[arg(long, global = true)]
    worker: Option<PathBuf>,

    /// Address to serve HTTP on (e.g. 127.0.0.1:5000)
    #[arg(long)]
    listen: Option<String>,

    /// Delay before restarting a worker that exited
    #[arg(long, global = true)]
    respawn_delay_ms: Option<u64>,

    /// Log filter used when RUST_LOG is unset (e.g. debug, stockbridge=trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one raw command to a fresh worker and print its JSON answer
    Send {
        /// The command line, e.g. "SUMMARY" or "TRENDS AAPL"
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_str()),
    )
    .init();

    let overrides = SettingsLayer {
        worker: WorkerLayer {
            program: cli.worker.clone(),
            respawn_delay_ms: cli.respawn_delay_ms,
            ..Default::default()
        },
        server: ServerLayer {
            listen: cli.listen.clone(),
        },
    };
    let settings = match config::load_settings(cli.config.as_deref(), overrides) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Commands::Send { words }) => {
            let bus = CommandBus::start(settings.worker);
            // A one-shot call gives up on the first failed spawn instead of
            // waiting on the bus's retry loop.
            let result = match bus.wait_for_worker().await {
                Ok(()) => bus.submit(words.join(" ")).await,
                Err(e) => Err(e),
            };
            bus.shutdown().await;
            match result {
                Ok(value) => {
                    println!("{}", value);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        None => serve(settings.worker, settings.server.listen).await,
    }
}

async fn serve(worker: config::WorkerConfig, listen: SocketAddr) -> ExitCode {
    let listener = match TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to listen on {}: {}", listen, e);
            return ExitCode::FAILURE;
        }
    };

    let bus = CommandBus::start(worker);
    let cancel = CancellationToken::new();
    let server = tokio::spawn(stockbridge::http::serve(
        listener,
        bus.clone(),
        cancel.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!(target: "stockbridge", "Failed to wait for Ctrl-C: {}", e);
    }
    log::info!(target: "stockbridge", "Shutting down");

    cancel.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!(target: "stockbridge::http", "Server error: {}", e),
        Err(e) => log::error!(target: "stockbridge::http", "Server task failed: {}", e),
    }
    bus.shutdown().await;
    ExitCode::SUCCESS
}
