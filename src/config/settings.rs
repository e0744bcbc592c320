use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::timeline::ReturnPolicy;
use crate::transport::ReconnectPolicy;
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend endpoints
    pub server: ServerConfig,
    /// Push-channel reconnect behaviour
    pub reconnect: ReconnectPolicy,
    /// Timeline retention and scope policy
    pub timeline: TimelineConfig,
    /// Output stream retention
    pub streams: StreamsConfig,
    /// Operator controls
    pub control: ControlConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the request/response channel (`{http_url}/sync`, `{http_url}/app_start`)
    pub http_url: String,
    /// WebSocket URL of the push channel
    pub ws_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct TimelineConfig {
    pub capacity: usize,
    pub return_policy: ReturnPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamsConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ControlConfig {
    pub continue_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_url: "http://127.0.0.1:8000/api".to_string(),
                ws_url: "ws://127.0.0.1:8000/api/ws".to_string(),
                request_timeout: Duration::from_secs(10),
            },
            reconnect: ReconnectPolicy::default(),
            timeline: TimelineConfig {
                capacity: 500,
                return_policy: ReturnPolicy::Sticky,
            },
            streams: StreamsConfig { capacity: 1000 },
            control: ControlConfig {
                continue_timeout: Duration::from_millis(2000),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlServerConfig {
    pub http_url: Option<String>,
    pub ws_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlReconnectConfig {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlTimelineConfig {
    pub capacity: Option<usize>,
    pub return_policy: Option<ReturnPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlStreamsConfig {
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlControlConfig {
    pub continue_timeout_ms: Option<u64>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub server: Option<TomlServerConfig>,
    pub reconnect: Option<TomlReconnectConfig>,
    pub timeline: Option<TomlTimelineConfig>,
    pub streams: Option<TomlStreamsConfig>,
    pub control: Option<TomlControlConfig>,
}

impl Config {
    /// Load configuration from the default file, merging with defaults.
    ///
    /// A missing file is created from the bundled example; an unreadable or
    /// invalid file is logged and the defaults are used.
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default configuration");
                Config::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration text, merging it on top of the defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config = toml::from_str::<TomlConfig>(contents)?;
        let mut config = Config::default();
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(server) = toml_config.server {
            if let Some(http_url) = server.http_url {
                self.server.http_url = http_url;
            }
            if let Some(ws_url) = server.ws_url {
                self.server.ws_url = ws_url;
            }
            if let Some(ms) = server.request_timeout_ms {
                self.server.request_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(reconnect) = toml_config.reconnect {
            if let Some(ms) = reconnect.initial_delay_ms {
                self.reconnect.initial_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = reconnect.max_delay_ms {
                self.reconnect.max_delay = Duration::from_millis(ms);
            }
            if let Some(multiplier) = reconnect.multiplier {
                self.reconnect.multiplier = multiplier;
            }
            self.reconnect = self.reconnect.normalized();
        }

        if let Some(timeline) = toml_config.timeline {
            if let Some(capacity) = timeline.capacity {
                self.timeline.capacity = non_zero_capacity("timeline.capacity", capacity);
            }
            if let Some(policy) = timeline.return_policy {
                self.timeline.return_policy = policy;
            }
        }

        if let Some(streams) = toml_config.streams {
            if let Some(capacity) = streams.capacity {
                self.streams.capacity = non_zero_capacity("streams.capacity", capacity);
            }
        }

        if let Some(control) = toml_config.control {
            if let Some(ms) = control.continue_timeout_ms {
                self.control.continue_timeout = Duration::from_millis(ms);
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &PathBuf) {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.server.http_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.server.ws_url = url.into();
        self
    }

    pub fn with_return_policy(mut self, policy: ReturnPolicy) -> Self {
        self.timeline.return_policy = policy;
        self
    }
}

fn non_zero_capacity(key: &str, capacity: usize) -> usize {
    if capacity == 0 {
        tracing::warn!(key, "Capacity must be at least 1; using 1");
        1
    } else {
        capacity
    }
}
