use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, CustomResourceExt};
use tracing::{debug, error, info};

use hcloud_fip::config::{Cli, Command, LogFormat};
use hcloud_fip::controller::{
    install_crd, run_controller, AssignerContext, ControllerState, KubeCluster, RandomSelector,
    Supervisor,
};
use hcloud_fip::crd::FloatingIP;
use hcloud_fip::provider::HcloudClient;
use hcloud_fip::rest_api;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command() {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&FloatingIP::crd())?);
            Ok(())
        }
        Command::Run => {
            initialize_logging(cli.log_format);
            run(cli).await
        }
    }
}

/// Initialize logging
///
/// Respects `RUST_LOG` if set, otherwise defaults to INFO level.
fn initialize_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .compact()
                .init();
        }
    }

    debug!("Logging initialized");
}

async fn kube_client(cli: &Cli) -> Result<Client> {
    match &cli.kubeconfig {
        Some(path) => {
            info!("Using kubeconfig {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting floating IP operator");

    let client = kube_client(&cli).await?;
    if cli.install_crd {
        install_crd(&client).await.context("installing CRD")?;
    }
    let provider = HcloudClient::new(cli.token()?, &cli.hcloud_endpoint, cli.provider_timeout())?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));

    let supervisor = Arc::new(Supervisor::new(AssignerContext {
        cluster: cluster.clone(),
        status: cluster.clone(),
        provider: Arc::new(provider),
        selector: Arc::new(RandomSelector),
    }));

    let mut server = tokio::spawn(rest_api::run_server(cli.metrics_addr, supervisor.clone()));

    let state = Arc::new(ControllerState {
        client,
        supervisor: supervisor.clone(),
        status: cluster,
        debounce: cli.debounce(),
    });

    // Either side ending stops the operator
    let result = tokio::select! {
        res = run_controller(state) => res.context("running controller"),
        res = &mut server => match res {
            Ok(Ok(())) => Err(anyhow!("metrics server exited")),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("running metrics server")),
            Err(e) => Err(anyhow::Error::new(e).context("metrics server task")),
        },
    };

    supervisor.shutdown().await;
    server.abort();

    if let Err(e) = &result {
        error!("Operator stopped: {:#}", e);
    }
    result
}
