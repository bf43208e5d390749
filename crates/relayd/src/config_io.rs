use anyhow::{Context, Result};
use relay_config::{load_or_default, RelayConfig};
use tracing::info;

/// Loads `config_path`, falling back to defaults when the file is absent.
pub(crate) async fn load_config(config_path: &str) -> Result<RelayConfig> {
    let path = config_path.to_string();
    let (config, exists) = tokio::task::spawn_blocking(move || load_or_default(path))
        .await
        .context("failed to join config load task")?
        .with_context(|| format!("failed to load config {config_path}"))?;

    if !exists {
        info!(path = config_path, "config file not found, using defaults");
    }
    Ok(config)
}
