//! Document IO for agent personas.
//!
//! One file per agent, `agents/<id>.json`, staged to a sibling `.tmp` file
//! and renamed into place so no reader ever observes a half-written
//! document. Encoding goes through `serde_json::Value` whose object map is
//! sorted, which keeps key order deterministic across writes.

use std::path::{Path, PathBuf};

use tokio::fs;
use torbo_protocol::{AgentConfig, GatewayError, GatewayResult};
use tracing::warn;

pub(crate) fn document_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Serialize an agent document in its canonical on-disk form.
pub(crate) fn encode_document(agent: &AgentConfig) -> GatewayResult<String> {
    let value = serde_json::to_value(agent)?;
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    Ok(text)
}

pub(crate) async fn write_document(dir: &Path, agent: &AgentConfig) -> GatewayResult<()> {
    let text = encode_document(agent)?;
    let path = document_path(dir, agent.id.as_str());
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, text)
        .await
        .map_err(|e| GatewayError::Storage(format!("stage {}: {e}", staged.display())))?;
    fs::rename(&staged, &path)
        .await
        .map_err(|e| GatewayError::Storage(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

pub(crate) async fn remove_document(dir: &Path, id: &str) -> GatewayResult<()> {
    let path = document_path(dir, id);
    fs::remove_file(&path)
        .await
        .map_err(|e| GatewayError::Storage(format!("remove {}: {e}", path.display())))
}

/// Load every parseable document in the directory, warning on each failure.
pub(crate) async fn load_documents(dir: &Path) -> GatewayResult<Vec<AgentConfig>> {
    let mut agents = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| GatewayError::Storage(format!("read {}: {e}", dir.display())))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GatewayError::Storage(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<AgentConfig>(&text) {
                Ok(agent) => agents.push(agent),
                Err(error) => {
                    warn!(%error, path = %path.display(), "skipping undecodable agent document");
                }
            },
            Err(error) => {
                warn!(%error, path = %path.display(), "skipping unreadable agent document");
            }
        }
    }
    Ok(agents)
}
