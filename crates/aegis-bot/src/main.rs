//! Aegis engine entry point.

use clap::Parser;
use tracing::{error, info};

use aegis_runtime::ExitCode;

/// Autonomous market-analysis and signal-generation engine.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also settable via AEGIS_CONFIG).
    #[arg(short, long)]
    config: Option<String>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = aegis_telemetry::init_logging() {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(ExitCode::ConfigError.code());
    }

    info!("starting aegis v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => aegis_bot::AppConfig::from_file(&path),
        None => aegis_bot::AppConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            // A broken config must not be restarted into a crash loop.
            error!(?e, "configuration error");
            std::process::exit(ExitCode::ConfigError.code());
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(?e, "failed to build runtime");
            std::process::exit(ExitCode::Recoverable.code());
        }
    };

    let code = runtime.block_on(async {
        let app = match aegis_bot::Application::new(config) {
            Ok(app) => app,
            Err(e) => {
                error!(?e, "failed to wire the application");
                return ExitCode::Recoverable;
            }
        };
        match app.run().await {
            Ok(code) => code,
            Err(e) => {
                error!(?e, "application failed");
                ExitCode::Recoverable
            }
        }
    });

    std::process::exit(code.code());
}
