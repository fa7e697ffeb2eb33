//! Logging and tracing initialization.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing/logging subsystem.
///
/// Log format defaults to compact text; set `MEMROUTER_LOG_FORMAT=json` for
/// structured output. Log level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() -> Result<()> {
    let json = std::env::var("MEMROUTER_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
    });
    let text_layer = (!json).then(|| fmt::layer().with_target(true));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}
