//! `vgpu-dm watch` command
//!
//! Reads the node's labels from a downward-API file and applies the config
//! named by the label. Label changes seen while an apply is running collapse
//! into a single follow-up apply of the latest value.

use super::{apply::apply_specs, build_engine, load_selected};
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vgpu_core::sync::{config_slot, ConfigPublisher};
use vgpu_core::{ManagerConfig, VgpuConfigManager};

pub const DEFAULT_LABEL: &str = "nvidia.com/vgpu.config";

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Path to the configuration file
    #[arg(short = 'f', long, env = "VGPU_DM_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Downward-API file holding the node's labels
    #[arg(long, env = "VGPU_DM_LABELS_FILE")]
    pub labels_file: PathBuf,

    /// Label naming the config to apply
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,

    /// Config to apply when the label is absent or empty
    #[arg(long, env = "VGPU_DM_DEFAULT_CONFIG")]
    pub default_config: String,

    /// Seconds between reads of the labels file
    #[arg(long, default_value = "5")]
    pub poll_interval_secs: u64,

    /// File to write `success` or `failed` to after each apply
    #[arg(long, env = "VGPU_DM_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

pub async fn watch(settings: ManagerConfig, args: WatchArgs) -> Result<()> {
    if args.default_config.is_empty() {
        anyhow::bail!("--default-config must not be empty");
    }

    let engine = tokio::task::spawn_blocking(move || build_engine(&settings)).await??;
    let engine = Arc::new(engine);

    let (publisher, mut subscriber) = config_slot();

    let initial = read_label(&args.labels_file, &args.label).await;
    publisher.publish(selected_or_default(initial.as_deref(), &args.default_config));

    let poller = tokio::spawn(poll_labels(publisher, args.clone(), initial));

    loop {
        info!(label = %args.label, "Waiting for change to label");
        tokio::select! {
            next = subscriber.next() => {
                let Some(name) = next else { break };
                let outcome =
                    update_config(engine.clone(), args.config_file.clone(), name.clone()).await;
                match &outcome {
                    Ok(()) => info!(config = %name, "Successfully updated to vGPU config"),
                    Err(e) => error!(
                        config = %name,
                        error = %format!("{:#}", e),
                        "Failed to apply vGPU config"
                    ),
                }
                if let Some(path) = &args.state_file {
                    write_state(path, outcome.is_ok()).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    poller.abort();
    Ok(())
}

/// Reload the config file and apply the named config on a blocking thread.
async fn update_config(
    engine: Arc<VgpuConfigManager>,
    config_file: PathBuf,
    name: String,
) -> Result<()> {
    info!(config = %name, "Updating to vGPU config");
    tokio::task::spawn_blocking(move || {
        let (_, specs) = load_selected(&config_file, Some(&name))
            .context("Unable to validate the selected vGPU configuration")?;
        let changed = apply_specs(&engine, &specs)?;
        debug!(gpus_changed = changed, "Apply finished");
        Ok::<(), anyhow::Error>(())
    })
    .await?
}

async fn poll_labels(publisher: ConfigPublisher, args: WatchArgs, mut last: Option<String>) {
    let mut interval = tokio::time::interval(Duration::from_secs(args.poll_interval_secs.max(1)));
    interval.tick().await;

    loop {
        interval.tick().await;
        let current = read_label(&args.labels_file, &args.label).await;
        if current == last {
            continue;
        }

        info!(label = %args.label, value = ?current, "Label changed");
        publisher.publish(selected_or_default(current.as_deref(), &args.default_config));
        last = current;
    }
}

fn selected_or_default<'a>(label: Option<&'a str>, default: &'a str) -> &'a str {
    match label {
        Some(value) if !value.is_empty() => value,
        _ => {
            info!(config = %default, "No vGPU config specified for node, using default");
            default
        }
    }
}

async fn read_label(path: &Path, key: &str) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_label(&content, key),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unable to read labels file");
            None
        }
    }
}

/// Find a label in downward-API format (`key="value"` per line).
fn parse_label(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        if k.trim() != key {
            return None;
        }
        Some(v.trim().trim_matches('"').to_string())
    })
}

async fn write_state(path: &Path, success: bool) {
    let state = if success { "success" } else { "failed" };
    if let Err(e) = tokio::fs::write(path, state).await {
        warn!(path = %path.display(), error = %e, "Unable to write state file");
    }
}
