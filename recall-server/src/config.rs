// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use recall_worker::{AgentConfig, ContextConfig, SearchConfig, VectorConfig, WatchdogConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Recall Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:37777")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Request timeout in seconds, not applied to the event stream
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Data directory; a leading `~/` is expanded to the home directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite file name inside `data_dir`
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:37777".to_string()
}

fn default_enable_cors() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./recall-data")
}

fn default_db_file() -> String {
    "recall.db".to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            enable_cors: default_enable_cors(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~") {
            Ok(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => self.data_dir.clone(),
            },
            Err(_) => self.data_dir.clone(),
        }
    }

    /// Full path of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.db_file)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration with priority: env > file > defaults
    ///
    /// Supported environment variables:
    /// - RECALL_HTTP_ADDR: HTTP listen address (default: 127.0.0.1:37777)
    /// - RECALL_DATA_DIR: Data directory path (default: ./recall-data)
    /// - RECALL_VECTOR_URL: Vector store base URL; setting it enables vector search
    /// - RECALL_VECTOR_ENABLED: Enable or disable vector search explicitly
    /// - RECALL_AGENT_MODEL: Compression model
    /// - ANTHROPIC_API_KEY: API key for the compression model
    /// - RECALL_LOG_JSON: JSON log output (default: false)
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Ok(Self::merge_with_env(config))
    }

    /// Merge config with environment variables (env takes priority)
    pub fn merge_with_env(mut config: Self) -> Self {
        config.apply_env();
        config
    }

    // Only variables that are set override the current value.
    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("RECALL_HTTP_ADDR") {
            self.server.listen_addr = addr;
        }

        if let Ok(data_dir) = std::env::var("RECALL_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(url) = std::env::var("RECALL_VECTOR_URL") {
            self.vector.base_url = url;
            self.vector.enabled = true;
        }

        if let Some(enabled) = std::env::var("RECALL_VECTOR_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            self.vector.enabled = enabled;
        }

        if let Ok(model) = std::env::var("RECALL_AGENT_MODEL") {
            self.agent.model = model;
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.trim().is_empty() {
                self.agent.api_key = Some(key);
            }
        }

        if let Some(json) = std::env::var("RECALL_LOG_JSON")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            self.logging.json = json;
        }
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.search.max_limit == 0 {
            anyhow::bail!("search.max_limit must be at least 1");
        }
        if self.search.vector_weight < 0.0 || self.search.keyword_weight < 0.0 {
            anyhow::bail!("search weights must not be negative");
        }
        if self.search.vector_weight + self.search.keyword_weight <= 0.0 {
            anyhow::bail!("search weights must not both be zero");
        }
        if self.vector.enabled && self.vector.base_url.trim().is_empty() {
            anyhow::bail!("Vector search enabled but no vector.base_url configured");
        }
        if self.watchdog.stuck_threshold_ms <= 0 {
            anyhow::bail!("watchdog.stuck_threshold_ms must be positive");
        }

        let data_dir = self.storage.resolved_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)?;
        }

        Ok(())
    }
}
