//! Streamlog broker binary
//!
//! Resolves configuration (CLI flags over config file over defaults),
//! initializes tracing, and runs the broker until SIGINT.

use std::process::ExitCode;

use clap::Parser;
use streamlog::{Broker, ConfigFile, Result, ServerArgs, ServerConfig, StreamlogError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("streamlog failed to start: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let args = ServerArgs::parse();

    let config_file = match &args.config {
        Some(path) => Some(ConfigFile::load(path)?),
        None => ConfigFile::load_default(),
    };
    let from_file = config_file.is_some();

    let config = ServerConfig::resolve(args, config_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if from_file {
        info!("configuration loaded from file");
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return Err(e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| StreamlogError::Server(format!("failed to create runtime: {e}")))?;

    runtime.block_on(async {
        let broker = Broker::new(config)?;
        broker
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received");
            })
            .await
    })
}
