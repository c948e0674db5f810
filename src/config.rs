use crate::realtime::{ChannelSettings, ReconnectPolicy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "https://backend-for-khatabook-f1cr.onrender.com";
pub const DEFAULT_SOCKET_URL: &str = "wss://backend-for-khatabook-f1cr.onrender.com";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Realtime channel settings; unset fields fall back to the built-in defaults
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RealtimeConfig {
    #[serde(default)]
    pub reconnection: Option<bool>,
    #[serde(default)]
    pub reconnection_attempts: Option<u32>,
    #[serde(default)]
    pub reconnection_delay_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub auto_connect: Option<bool>,
}

impl RealtimeConfig {
    pub fn channel_settings(&self) -> ChannelSettings {
        let defaults = ReconnectPolicy::default();
        ChannelSettings {
            reconnect: ReconnectPolicy {
                enabled: self.reconnection.unwrap_or(defaults.enabled),
                attempts: self.reconnection_attempts.unwrap_or(defaults.attempts),
                delay: self
                    .reconnection_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.delay),
            },
            connect_timeout: Duration::from_millis(self.connect_timeout_ms.unwrap_or(20_000)),
        }
    }

    /// How long a blocking socket read waits before the worker checks its queue
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.unwrap_or(250))
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect.unwrap_or(true)
    }

    fn merge(&mut self, other: RealtimeConfig) {
        if other.reconnection.is_some() {
            self.reconnection = other.reconnection;
        }
        if other.reconnection_attempts.is_some() {
            self.reconnection_attempts = other.reconnection_attempts;
        }
        if other.reconnection_delay_ms.is_some() {
            self.reconnection_delay_ms = other.reconnection_delay_ms;
        }
        if other.connect_timeout_ms.is_some() {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        if other.read_timeout_ms.is_some() {
            self.read_timeout_ms = other.read_timeout_ms;
        }
        if other.auto_connect.is_some() {
            self.auto_connect = other.auto_connect;
        }
    }
}

/// Configuration for backend HTTP calls
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HttpConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Configuration for the search view
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SearchConfig {
    /// Show the two sample rows while a search is submitted
    #[serde(default)]
    pub placeholder_results: Option<bool>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub socket_url: Option<String>,
    #[serde(default)]
    pub preferences_path: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.cashtrack/config.local.toml) > project (.cashtrack/config.toml)
    /// > user (~/.cashtrack/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cashtrack").join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(".cashtrack").join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(".cashtrack").join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority for every
    /// field it sets)
    pub fn merge(&mut self, other: Config) {
        if other.backend_url.is_some() {
            self.backend_url = other.backend_url;
        }
        if other.socket_url.is_some() {
            self.socket_url = other.socket_url;
        }
        if other.preferences_path.is_some() {
            self.preferences_path = other.preferences_path;
        }
        if other.log_dir.is_some() {
            self.log_dir = other.log_dir;
        }
        self.realtime.merge(other.realtime);
        if other.http.timeout_ms.is_some() {
            self.http.timeout_ms = other.http.timeout_ms;
        }
        if other.search.placeholder_results.is_some() {
            self.search.placeholder_results = other.search.placeholder_results;
        }
    }

    pub fn backend_url(&self) -> &str {
        self.backend_url.as_deref().unwrap_or(DEFAULT_BACKEND_URL)
    }

    pub fn socket_url(&self) -> &str {
        self.socket_url.as_deref().unwrap_or(DEFAULT_SOCKET_URL)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http.timeout_ms.map(Duration::from_millis)
    }

    pub fn placeholder_results(&self) -> bool {
        self.search.placeholder_results.unwrap_or(true)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_path
            .clone()
            .unwrap_or_else(crate::preferences::FilePreferences::default_path)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cashtrack")
                .join("logs")
        })
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        match url::Url::parse(self.backend_url()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError {
                field: "backend_url".to_string(),
                message: format!("Expected an http(s) URL, got scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError {
                field: "backend_url".to_string(),
                message: format!("Invalid URL '{}': {}", self.backend_url(), e),
            }),
        }

        if let Err(e) = crate::realtime::endpoint(self.socket_url()) {
            errors.push(ValidationError {
                field: "socket_url".to_string(),
                message: e.to_string(),
            });
        }

        for (field, value) in [
            ("realtime.connect_timeout_ms", self.realtime.connect_timeout_ms),
            ("realtime.read_timeout_ms", self.realtime.read_timeout_ms),
            ("http.timeout_ms", self.http.timeout_ms),
        ] {
            if value == Some(0) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
