use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::ExecutionMode;
use crate::consumer::MalformedLinePolicy;
use crate::logging::LogFormat;

const PROJECT_CONFIG_NAME: &str = ".mongolog-ingest.toml";
const APP_DIR: &str = "mongolog-ingest";

/// Settings read from a TOML file. Every key is optional; command-line values
/// take precedence over anything set here.
///
/// ```toml
/// [tags]
/// project = "shop"
/// hostname = "db1"
///
/// [influxdb]
/// host = "influx.local"
/// port = 8086
/// database = "insight"
/// ssl = true
///
/// [pipeline]
/// workers = 4
/// batch_size = 5000
/// mode = "process"
///
/// [retry]
/// max_attempts = 5
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub tags: TagsSection,
    pub influxdb: InfluxSection,
    pub pipeline: PipelineSection,
    pub retry: RetrySection,
    pub logging: LoggingSection,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagsSection {
    pub project: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfluxSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub ssl: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub mode: Option<ExecutionMode>,
    pub on_malformed: Option<MalformedLinePolicy>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

impl ConfigFile {
    /// Find project-level config by walking up from the working directory
    pub fn find_project_config() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;
        loop {
            let config_path = current.join(PROJECT_CONFIG_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    /// User config location: $XDG_CONFIG_HOME, falling back to ~/.config
    pub fn user_config_path() -> PathBuf {
        let config_home = env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".config"))
                    .unwrap_or_else(|_| PathBuf::from(".config"))
            });
        config_home.join(APP_DIR).join("config.toml")
    }

    /// Load with precedence: project file over user file over defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let user_path = Self::user_config_path();
        if user_path.exists() {
            config = config.merge(Self::load_from_path(&user_path)?);
        }

        if let Some(project_path) = Self::find_project_config() {
            config = config.merge(Self::load_from_path(&project_path)?);
        }

        Ok(config)
    }

    /// An explicit path replaces the search entirely
    pub fn load_with_custom_path(custom_path: Option<&Path>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `other` on top of `self`; keys set in `other` win
    pub fn merge(self, other: ConfigFile) -> ConfigFile {
        ConfigFile {
            tags: TagsSection {
                project: other.tags.project.or(self.tags.project),
                hostname: other.tags.hostname.or(self.tags.hostname),
            },
            influxdb: InfluxSection {
                host: other.influxdb.host.or(self.influxdb.host),
                port: other.influxdb.port.or(self.influxdb.port),
                database: other.influxdb.database.or(self.influxdb.database),
                ssl: other.influxdb.ssl.or(self.influxdb.ssl),
                username: other.influxdb.username.or(self.influxdb.username),
                password: other.influxdb.password.or(self.influxdb.password),
                timeout_secs: other.influxdb.timeout_secs.or(self.influxdb.timeout_secs),
            },
            pipeline: PipelineSection {
                workers: other.pipeline.workers.or(self.pipeline.workers),
                batch_size: other.pipeline.batch_size.or(self.pipeline.batch_size),
                queue_capacity: other.pipeline.queue_capacity.or(self.pipeline.queue_capacity),
                mode: other.pipeline.mode.or(self.pipeline.mode),
                on_malformed: other.pipeline.on_malformed.or(self.pipeline.on_malformed),
            },
            retry: RetrySection {
                max_attempts: other.retry.max_attempts.or(self.retry.max_attempts),
                base_delay_ms: other.retry.base_delay_ms.or(self.retry.base_delay_ms),
                max_delay_ms: other.retry.max_delay_ms.or(self.retry.max_delay_ms),
            },
            logging: LoggingSection {
                level: other.logging.level.or(self.logging.level),
                format: other.logging.format.or(self.logging.format),
            },
        }
    }
}
