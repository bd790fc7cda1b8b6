//! Tracing subscriber setup for the `cbot` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job. `RUST_LOG` overrides the level passed in.

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber writing to stderr.
///
/// `format` is one of `pretty`, `compact`, or `json`.
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()?,
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?,
        other => bail!("Unknown log format: '{}'. Must be pretty, compact, or json.", other),
    }

    Ok(())
}
