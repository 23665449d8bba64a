//! # Mirror Server Binary
//!
//! Entry point for the replication service: load configuration, open the
//! store, resume active jobs, and run until a shutdown signal arrives.

use std::env;
use std::process;

use clap::{Arg, Command};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirror_service::{Config, MirrorError, MirrorService, SERVICE_NAME, VERSION};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = dotenv() {
        warn!("no .env file loaded: {}", e);
    }

    let matches = create_cli().get_matches();

    if matches.get_flag("validate-config") {
        match load_configuration() {
            Ok(_) => {
                info!("configuration is valid");
                process::exit(0);
            }
            Err(e) => {
                error!("configuration validation failed: {}", e);
                process::exit(1);
            }
        }
    }

    info!("starting {} version {}", SERVICE_NAME, VERSION);

    let config = match load_configuration() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    info!("environment: {}", config.environment.name);

    if let Err(e) = run_service(config).await {
        error!("service failed: {}", e);
        process::exit(1);
    }
    info!("service stopped gracefully");
}

/// Initialize structured logging
fn init_logging() {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let subscriber = tracing_subscriber::registry();

    match log_format.as_str() {
        "json" => {
            subscriber
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_span_list(true),
                )
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .init();
        }
        _ => {
            subscriber
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .init();
        }
    }
}

/// Create CLI interface
fn create_cli() -> Command {
    Command::new(SERVICE_NAME)
        .version(VERSION)
        .about("Kafka replication service with persistent jobs and live metrics")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("validate-config")
                .long("validate-config")
                .help("Validate configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Override log level (error, warn, info, debug, trace)")
                .action(clap::ArgAction::Set),
        )
}

/// Load and validate configuration
fn load_configuration() -> Result<Config, MirrorError> {
    let config = Config::from_env()
        .map_err(|e| MirrorError::configuration(format!("failed to load configuration: {e}")))?;
    config
        .validate()
        .map_err(|e| MirrorError::configuration(e.to_string()))?;
    Ok(config)
}

/// Run the service until a shutdown signal arrives
async fn run_service(config: Config) -> Result<(), MirrorError> {
    let service = MirrorService::new(config).await?;
    service.start().await?;

    shutdown_signal().await;

    info!("initiating graceful shutdown");
    service.stop().await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C signal");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
        info!("received SIGTERM signal");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_creation() {
        let cli = create_cli();
        assert_eq!(cli.get_name(), SERVICE_NAME);
    }
}
