//! xbridge: serves the JSON-line command protocol on stdin/stdout.
//! Logs go to stderr.

use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::{error, info};
use xb_bridge::bridge::{write_startup_failure, CommandBridge};
use xb_core::config::{Config, LoggingConfig};
use xb_daemon::{environment, startup};
use xb_telemetry::logging::{init_logging, LogFormat};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let env_source = environment::load();
    let loaded = Config::load();

    // Logging comes up even when the config is broken, so the failure is visible.
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    init_logging("xbridge", &logging.level, LogFormat::from_json_flag(logging.json));
    environment::log_source(&env_source);
    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "xbridge starting");

    let bridge = match loaded
        .context("loading configuration")
        .and_then(|config| startup::build_bridge(&config))
    {
        Ok(bridge) => bridge,
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "startup failed");
            if let Err(write_err) = write_startup_failure(&mut tokio::io::stdout(), &message).await {
                error!(error = %write_err, "could not report startup failure");
            }
            return ExitCode::FAILURE;
        }
    };

    match serve(bridge).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "bridge failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(bridge: CommandBridge) -> Result<()> {
    let shutdown = bridge.shutdown_signal();

    // Wire ctrl-c to trigger graceful shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    let report = bridge
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("serving stdio")?;
    info!(lines = report.lines, aborted = report.aborted, "xbridge exiting");
    Ok(())
}
