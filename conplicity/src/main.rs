use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use conplicity::backup::{BackupCycle, Supervisor};
use conplicity::client::InventoryClient;
use conplicity::config::RunConfiguration;
use conplicity::metrics::{JOB_NAME, MetricsReporter};
use conplicity::runtime::{ContainerRuntime, DockerRuntime};
use conplicity::utils::cli::{BackupArgs, Cli, Commands, VolumesArgs};
use conplicity::utils::context::CallContext;
use conplicity::utils::logging::init_logging;
use gethostname::gethostname;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.loglevel, cli.json)?;

    match cli.command {
        Commands::Backup(args) => backup(args).await,
        Commands::Volumes(args) => list_volumes(args).await,
    }
}

async fn backup(args: BackupArgs) -> anyhow::Result<()> {
    let hostname = gethostname().to_string_lossy().into_owned();
    let config = Arc::new(RunConfiguration::from_args(&args, hostname)?);

    let ctx = CallContext::background();
    tokio::spawn(cancel_on_shutdown(ctx.clone()));

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(&config.docker_endpoint)?);
    runtime
        .ensure_image(&ctx, &config.image)
        .await
        .context("Failed to pull image")?;

    let mut cycle = BackupCycle::new(Supervisor::new(runtime, config.clone()));
    let outcome = cycle.run(&ctx, &args.volumes).await;

    // Whatever ran is reported, even when the cycle stopped early.
    let pushed = match MetricsReporter::new(config.pushgateway_url.clone()) {
        Ok(reporter) => reporter.push(cycle.metrics(), JOB_NAME, &config.hostname).await,
        Err(e) => Err(e),
    };
    if let Err(e) = pushed {
        error!(error = %e, "Failed to push metrics");
    }

    let report = outcome.context("Backup cycle aborted")?;
    for failed in report.failed() {
        warn!(
            volume = %failed.volume,
            backup_exit_code = failed.backup_exit_code,
            verify_exit_code = ?failed.verify_exit_code,
            "Volume backup failed"
        );
    }
    info!(
        backed_up = report.volumes.len(),
        skipped = report.skipped.len(),
        failed = report.failed().count(),
        "Backup cycle finished"
    );
    Ok(())
}

async fn list_volumes(args: VolumesArgs) -> anyhow::Result<()> {
    let client = InventoryClient::connect(&args.remote_address, &args.psk)
        .await
        .with_context(|| format!("failed to connect to the remote instance {}", args.remote_address))?;
    let volumes = client.list_volumes().await?;

    for volume in volumes {
        println!("{}\t{}\t{}", volume.name, volume.hostname, volume.mountpoint);
    }
    Ok(())
}

async fn cancel_on_shutdown(ctx: CallContext) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutting down, aborting the running backup");
    ctx.cancel();
}
