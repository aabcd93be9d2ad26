//! Tracing subscriber setup for hosts embedding the cache layer.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the binary. This helper covers the common case: human-readable or
//! JSON lines on stderr, filtered by `RUST_LOG` (default `warn`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a global tracing subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Plain => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    tracing::debug!(?format, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parses_from_config() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap_or_default();
        assert_eq!(format, LogFormat::Json);
    }
}
