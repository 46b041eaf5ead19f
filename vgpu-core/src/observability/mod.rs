//! Observability infrastructure: tracing and metrics.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Environment variable enabling debug output.
pub const DEBUG_ENV: &str = "VGPU_DM_DEBUG";

/// Initialize the global tracing subscriber and describe core metrics.
///
/// `RUST_LOG` directives are honoured; otherwise the level is `info`, or
/// `debug` when `debug` is set.
pub fn init(debug: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    metrics::register_core_metrics();

    tracing::debug!("Observability initialized");
    Ok(())
}
