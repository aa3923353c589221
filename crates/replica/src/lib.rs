//! # Replica Node - Main Entry Point
//!
//! Hosts a simulated room of participants that share one entity/component scene through
//! an in-memory store. This entry point handles CLI parsing, configuration loading,
//! logging and the application lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! replica
//!
//! # Five participants, leave after a minute
//! replica --participants 5 --run-for 60
//!
//! # JSON logging
//! replica --json-logs --log-level debug
//! ```
//!
//! ## Configuration
//!
//! The node loads configuration from a TOML file (default: `replica.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! On SIGINT (Ctrl+C) or SIGTERM every participant leaves the room, retracting the
//! entities and components it owns. A second signal exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Runs the node: parse arguments, load configuration, set up logging, run the room.
///
/// Called from `main` inside the tokio runtime.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings are needed before the application reports anything
    let mut config = AppConfig::load_from_file(&args.config_path).await.unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use app::{convergence, ConvergenceReport, Room};
pub use config::{LoggingSettings, SessionSettings};
