pub mod config;         // Configuration management
pub mod coordinator;    // Poll loop and derived state
pub mod error;          // Protocol error types
pub mod eversolar;      // Eversolar PMU protocol implementation
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod utils;          // Utility functions

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::eversolar::client::Pmu;
use crate::options::Command;
use crate::prelude::*;

/// Main application entry point: parse options, load config, dispatch.
pub async fn app(shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let options = Options::new();

    let config = Config::new(options.config_file.clone()).unwrap_or_else(|err| {
        eprintln!("Failed to load config {}: {:?}", options.config_file, err);
        std::process::exit(255);
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.loglevel()))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    info!("eversolar-bridge {} starting", CARGO_PKG_VERSION);

    let config = Arc::new(config);

    match options.command.unwrap_or(Command::Monitor) {
        Command::Monitor => {
            let mut coordinator = Coordinator::new(config);
            coordinator.start(shutdown_rx).await
        }
        Command::Poll => {
            let pmu = Pmu::new(config.pmu().clone());
            let reading = pmu.poll().await?;
            println!("{}", serde_json::to_string_pretty(&reading)?);
            Ok(())
        }
        Command::SyncTime => {
            let pmu = Pmu::new(config.pmu().clone());
            match pmu.sync_time().await {
                Ok(()) => {
                    info!("device time set");
                    Ok(())
                }
                Err(e) => {
                    error!("time sync failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::TestConnection => {
            let pmu = Pmu::new(config.pmu().clone());
            match pmu.test_connection().await {
                Ok(()) => {
                    println!("{}:{} ok", config.pmu().host(), config.pmu().port());
                    Ok(())
                }
                Err(e) => {
                    println!("{}:{} unreachable: {}", config.pmu().host(), config.pmu().port(), e);
                    std::process::exit(1);
                }
            }
        }
    }
}
