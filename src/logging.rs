//! tracing-subscriber setup. Logs always go to stderr so stdout stays free
//! for dry-run output.

use anyhow::Result;
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, with thread names
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Build the filter; `RUST_LOG` wins over the configured level
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", level, e)),
    }
}

/// Install the global subscriber. Call once, before the pipeline starts.
pub fn init(settings: &LogSettings) -> Result<()> {
    let filter = env_filter(&settings.level)?;

    match settings.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_thread_names(true)
                    .with_target(false),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize text log output: {}", e))?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .with_current_span(true),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize JSON log output: {}", e))?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(env_filter("info").is_ok());
        assert!(env_filter("mongolog_ingest=debug,warn").is_ok());
        assert!(env_filter("mongolog_ingest=loudest").is_err());
    }

    #[test]
    fn test_format_serde() {
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
        let back: LogFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(back, LogFormat::Text);
    }
}
