use super::config::Config;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to set global subscriber: {0}")]
    InitFailed(#[from] tracing::subscriber::SetGlobalDefaultError),
}

// HTTP stack internals are noisy at the agent's default level.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "h2"];

fn build_filter_string(config: &Config) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 1);
    parts.push(config.log_level.as_str().to_string());
    for target in QUIET_TARGETS {
        parts.push(format!("{target}=warn"));
    }
    parts.join(",")
}

/// Install the global tracing subscriber from the configured level.
/// `RUST_LOG` takes precedence over the config when set.
pub fn init_logging(config: &Config) -> Result<(), LoggingError> {
    let filter_string = build_filter_string(config);
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&filter_string).map_err(|source| LoggingError::InvalidFilter {
            filter: filter_string.clone(),
            source,
        })
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_target(true)),
        )?;
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(true).compact()),
        )?;
    }

    Ok(())
}
