//! End-to-end checks of the wired gateway core.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::fs;
use torbo_kernel::KernelBuilder;
use torbo_protocol::{AccessLevel, Action, AgentConfig, AgentId, GatewayConfig};

fn unique_test_root(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("{name}-{nanos}"))
}

fn config(root: &PathBuf) -> GatewayConfig {
    GatewayConfig::with_data_dir(root)
}

#[tokio::test]
async fn fresh_kernel_denies_and_logs_with_reason() -> Result<()> {
    let root = unique_test_root("torbo-kernel-deny");
    let kernel = KernelBuilder::new(config(&root)).build()?;
    kernel.initialize().await?;

    kernel.iam().register("a1", "", "test agent").await?;
    let allowed = kernel
        .check_access("a1", "tool:run_command", Action::Execute)
        .await;
    assert!(!allowed);

    let log = kernel.iam().get_access_log(Some("a1"), None, 10, 0).await;
    assert_eq!(log.len(), 1);
    assert!(!log[0].allowed);
    assert_eq!(
        log[0].reason.as_deref(),
        Some("No matching permission for execute on tool:run_command")
    );

    // The denial reached the bus and the durable audit table.
    let events = kernel.bus().recent_events(10, Some("iam.access.denied"));
    assert_eq!(events.len(), 1);
    let audited = kernel
        .bus()
        .critical_events(10, Some("iam.access.denied"))
        .await?;
    assert_eq!(audited.len(), 1);

    kernel.shutdown().await;
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn tool_wildcard_grant_covers_use_but_not_execute() -> Result<()> {
    let root = unique_test_root("torbo-kernel-wildcard");
    let kernel = KernelBuilder::new(config(&root)).build()?;
    kernel.initialize().await?;

    kernel
        .iam()
        .grant("a1", "tool:*", &[Action::Use], "tester")
        .await?;
    assert!(kernel.iam().check("a1", "tool:web_search", Action::Use).await);
    assert!(!kernel.iam().check("a1", "tool:web_search", Action::Execute).await);

    kernel.shutdown().await;
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn bootstrap_migrates_level_four_agent_to_exec_defaults() -> Result<()> {
    let root = unique_test_root("torbo-kernel-migrate");
    let kernel = KernelBuilder::new(config(&root)).build()?;
    kernel.initialize().await?;

    let executor = AgentConfig {
        id: AgentId::from_string("executor"),
        name: "Executor".to_owned(),
        access_level: AccessLevel::Exec,
        ..AgentConfig::default()
    };
    kernel.registry().create(executor).await?;
    let agents = kernel.registry().list().await;
    kernel.iam().auto_migrate_existing_agents(&agents).await?;

    assert!(
        kernel
            .iam()
            .check("executor", "tool:execute_code", Action::Execute)
            .await
    );
    assert!(!kernel.iam().check("executor", "*", Action::Any).await);

    kernel.shutdown().await;
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn repeated_denied_execution_surfaces_as_privilege_escalation() -> Result<()> {
    let root = unique_test_root("torbo-kernel-escalation");
    let kernel = KernelBuilder::new(config(&root)).build()?;
    kernel.initialize().await?;

    kernel.iam().register("a1", "", "probe").await?;
    for _ in 0..6 {
        kernel
            .iam()
            .log("a1", "tool:execute_code", "execute", false, Some("denied"))
            .await?;
    }

    let anomalies = kernel.iam().detect_anomalies().await;
    let escalation = anomalies
        .iter()
        .find(|a| a.kind == torbo_iam::AnomalyType::PrivilegeEscalation)
        .expect("privilege escalation detected");
    assert_eq!(escalation.agent_id, "a1");
    assert_eq!(escalation.severity, torbo_iam::AnomalySeverity::High);

    kernel.shutdown().await;
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn built_in_agent_survives_every_bootstrap() -> Result<()> {
    let root = unique_test_root("torbo-kernel-builtin");

    // Empty directory.
    {
        let kernel = KernelBuilder::new(config(&root)).build()?;
        kernel.initialize().await?;
        assert!(kernel.registry().list().await.iter().any(|a| a.is_built_in));
        kernel.shutdown().await;
    }

    // Directory with only a corrupted document.
    fs::write(root.join("agents/junk.json"), "].[").await?;
    {
        let kernel = KernelBuilder::new(config(&root)).build()?;
        kernel.initialize().await?;
        assert!(kernel.registry().list().await.iter().any(|a| a.is_built_in));
        kernel.shutdown().await;
    }

    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn second_initialize_does_not_duplicate_migration_grants() -> Result<()> {
    let root = unique_test_root("torbo-kernel-idempotent");
    {
        let kernel = KernelBuilder::new(config(&root)).build()?;
        kernel.initialize().await?;
        kernel.shutdown().await;
    }
    let kernel = KernelBuilder::new(config(&root)).build()?;
    kernel.initialize().await?;

    let built_in = kernel
        .registry()
        .list()
        .await
        .into_iter()
        .find(|a| a.is_built_in)
        .unwrap();
    let perms = kernel.iam().permissions(built_in.id.as_str()).await;
    let file_grants = perms.iter().filter(|p| p.resource == "file:*").count();
    assert_eq!(file_grants, 1);

    kernel.shutdown().await;
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}

#[tokio::test]
async fn access_log_pruning_respects_configured_retention() -> Result<()> {
    let root = unique_test_root("torbo-kernel-prune");
    let kernel = KernelBuilder::new(config(&root)).build()?;
    kernel.initialize().await?;

    kernel.iam().log("a1", "file:/x", "read", true, None).await?;
    let deleted = kernel.prune_access_log().await?;
    assert_eq!(deleted, 0);

    kernel.shutdown().await;
    let _ = fs::remove_dir_all(root).await;
    Ok(())
}
