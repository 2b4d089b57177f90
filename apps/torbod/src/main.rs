use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use torbo_crypto::{NodeIdentity, NodeKeyPair};
use torbo_kernel::KernelBuilder;
use torbo_protocol::{Action, GatewayConfig};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "torbod")]
#[command(about = "Torbo Base gateway demo daemon")]
struct Cli {
    #[arg(long, default_value = ".torbo")]
    root: PathBuf,
    #[arg(long, default_value = "torbo-node")]
    node_name: String,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 8787)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .compact()
        .init();

    let cli = Cli::parse();

    let config = GatewayConfig::with_data_dir(&cli.root);
    let keypair = NodeKeyPair::load_or_generate(cli.root.join("node.key"))?;
    info!(fingerprint = %keypair.fingerprint(), "node key loaded");
    let identity = NodeIdentity::new(cli.node_name.as_str(), cli.node_name.as_str(), keypair);

    let kernel = KernelBuilder::new(config)
        .identity(identity)
        .listen(cli.host, cli.port)
        .build()?;
    kernel.initialize().await?;

    let bus = kernel.bus();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bus.add_streaming_client("torbod-tail", "*", tx);
    let event_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            info!(event = %line, "bus.event");
        }
    });

    // A short grant/check/deny cycle against the built-in agent.
    let agents = kernel.registry().list().await;
    let built_in = agents
        .iter()
        .find(|agent| agent.is_built_in)
        .ok_or_else(|| anyhow::anyhow!("built-in agent missing after bootstrap"))?;
    let agent_id = built_in.id.to_string();
    info!(agent = %agent_id, level = %built_in.access_level, "registry bootstrapped");

    let read_ok = kernel
        .check_access(&agent_id, "file:/notes/today.md", Action::Read)
        .await;
    let exec_ok = kernel
        .check_access(&agent_id, "tool:run_command", Action::Execute)
        .await;
    info!(read_ok, exec_ok, "access checks complete");

    kernel
        .iam()
        .grant(&agent_id, "tool:clipboard", &[Action::Use], "torbod")
        .await?;
    info!(
        clipboard = kernel.check_access(&agent_id, "tool:clipboard", Action::Use).await,
        "clipboard granted"
    );

    let risk = kernel.iam().calculate_risk(&agent_id).await;
    let anomalies = kernel.iam().detect_anomalies().await;
    info!(risk, anomalies = anomalies.len(), "iam analytics");

    let capabilities = kernel.delegation().get_capabilities().await;
    info!(
        node = %capabilities.node_id,
        skills = capabilities.skill_ids.len(),
        load = capabilities.current_load,
        "delegation capabilities"
    );

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    bus.remove_streaming_client("torbod-tail");
    event_task.abort();
    if let Err(error) = event_task.await {
        if !error.is_cancelled() {
            warn!(%error, "event tail stopped");
        }
    }

    kernel.shutdown().await;
    Ok(())
}
