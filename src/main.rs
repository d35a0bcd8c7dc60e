//! turlsvc — a cluster-safe URL shortener service.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use turlsvc::app::App;
use turlsvc::config::{Config, LogFormat};

#[derive(Parser)]
#[command(name = "turlsvc", version = turlsvc::VERSION, about = "A cluster-safe URL shortener service")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "URLSVC_CONFIG", default_value = "turlsvc.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default if no subcommand is given).
    Serve,
    /// Validate the configuration file and exit.
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckConfig => {
            tracing::info!("configuration is valid");
            ExitCode::SUCCESS
        }
        Command::Serve => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("fatal: failed to start async runtime: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match runtime.block_on(run(config)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "fatal startup error");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run(config: Config) -> turlsvc::error::Result<()> {
    let app = App::new(config).await?;
    app.run().await
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
