use anyhow::Context;
use autoplant::cli::Args;
use autoplant::config::AppConfig;
use autoplant::devices::sim::SimulatedDevices;
use autoplant::logging;
use autoplant::orchestrator::Orchestrator;
use autoplant::telemetry;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let _log_guard = logging::init_logging(config.logging.directory.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "autoplant starting");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    if let Some(dir) = &config.logging.directory {
        logging::start_retention_cleanup(dir.clone(), config.logging.retention_days, cancel.child_token());
    }

    warn!("no hardware backend configured, using simulated devices");
    let devices = SimulatedDevices::new().device_set();

    let (channels, link_task) = telemetry::start(&config, cancel.clone()).unzip();

    let orchestrator = Orchestrator::new(devices, config.orchestrator(), cancel.clone());
    let result = orchestrator.run(channels).await;

    // A failed orchestrator must still let the link disconnect.
    cancel.cancel();
    if let Some(task) = link_task {
        if let Err(e) = task.await {
            warn!(error = %e, "telemetry task panicked");
        }
    }

    result?;
    info!("autoplant stopped");
    Ok(())
}

/// Cancel `cancel` on Ctrl-C, or SIGTERM on unix.
fn spawn_signal_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let signal = tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        #[cfg(not(unix))]
        let signal = {
            let _ = tokio::signal::ctrl_c().await;
            "Ctrl-C"
        };

        info!(signal, "shutdown requested, stopping actuators");
        cancel.cancel();
    });

    Ok(())
}
