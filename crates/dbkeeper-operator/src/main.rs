//! dbkeeper - scheduled database backups for Kubernetes

use clap::Parser;

use dbkeeper_common::crd::DatabaseBackup;
use dbkeeper_common::kube_utils::{create_client, install_crd};
use dbkeeper_common::telemetry::{init_telemetry, TelemetryConfig};
use dbkeeper_common::FIELD_MANAGER;
use dbkeeper_operator::cli::{Cli, ControllerArgs};
use dbkeeper_operator::controller_runner::build_backup_controllers;
use dbkeeper_operator::render_crd;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", render_crd()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "dbkeeper-operator".to_string(),
        ..Default::default()
    })?;

    run_controller(cli.controller_args()).await
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = create_client().await?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        install_crd::<DatabaseBackup>(&client, FIELD_MANAGER).await?;
    }

    tracing::info!(
        registry = %args.image_registry,
        tag = %args.image_tag,
        "Starting controllers"
    );
    let controllers = build_backup_controllers(client, args.images(), args.namespace.as_deref());
    futures::future::join_all(controllers).await;

    tracing::info!("Shutting down");
    Ok(())
}
