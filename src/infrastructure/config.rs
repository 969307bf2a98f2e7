//! TOML configuration for gates, processor queues and logging.
//!
//! ```toml
//! [gate]
//! max_concurrency = 8
//!
//! [queue]
//! capacity = 256
//! full_mode = "reject"
//! drain_timeout_ms = 5000
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use crate::infrastructure::logging::{LogConfig, LogFormat, LogOutput};
use crate::orchestration::gate::PermitPool;
use crate::orchestration::queue::{FullMode, QueueOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = ".tasklane.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Unset means operations are not throttled.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub full_mode: FullMode,

    #[serde(default)]
    pub drain_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default = "default_false")]
    pub span_events: bool,

    /// Write daily rotated files here instead of stderr.
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            full_mode: FullMode::Wait,
            drain_timeout_ms: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            filter: None,
            span_events: false,
            directory: None,
        }
    }
}

fn default_capacity() -> usize { 1024 }
fn default_level() -> String { "info".to_string() }
fn default_format() -> String { "compact".to_string() }
fn default_false() -> bool { false }

impl OrchestrationConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Find `.tasklane.toml` in the current directory or its parents.
    /// Falls back to defaults when none loads.
    pub fn discover() -> Self {
        std::env::current_dir()
            .ok()
            .and_then(|dir| Self::discover_from(&dir))
            .unwrap_or_default()
    }

    /// Walk up from `start`, returning the first config file that parses.
    pub fn discover_from(start: &Path) -> Option<Self> {
        let mut current: Option<PathBuf> = Some(start.to_path_buf());

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return Some(config);
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        None
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Permit pool for `[gate]`, or `None` when unthrottled.
    pub fn pool(&self) -> Option<PermitPool> {
        self.gate.max_concurrency.map(PermitPool::new)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            capacity: self.queue.capacity,
            full_mode: self.queue.full_mode,
            drain_timeout: self.queue.drain_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn log_config(&self) -> Result<LogConfig, String> {
        let logging = &self.logging;
        let level = logging
            .level
            .parse()
            .map_err(|_| format!("Unknown log level: {}", logging.level))?;
        let format: LogFormat = logging.format.parse()?;
        let output = match &logging.directory {
            Some(directory) => LogOutput::File {
                directory: directory.clone(),
                prefix: "tasklane".to_string(),
            },
            None => LogOutput::Stderr,
        };

        Ok(LogConfig {
            level,
            format,
            output,
            span_events: logging.span_events,
            filter: logging.filter.clone(),
        })
    }
}
