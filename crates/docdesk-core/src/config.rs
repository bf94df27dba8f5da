//! Configuration types and loading for docdesk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the docdesk database.
    pub database: PathBuf,

    /// Path to the local cache mirror (per profile, best effort).
    pub cache_path: PathBuf,

    /// Chat widget behaviour.
    pub chat: ChatConfig,

    /// Fan-out bus configuration.
    pub bus: BusConfig,

    /// AI reply endpoint configuration.
    pub reply: ReplyConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docdesk");

        Self {
            database: data_dir.join("docdesk.db"),
            cache_path: crate::paths::default_cache_path(),
            chat: ChatConfig::default(),
            bus: BusConfig::default(),
            reply: ReplyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docdesk")
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from_path(path)?
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
        self.cache_path = Self::expand_path(&self.cache_path.to_string_lossy());
    }

    /// Apply `DOCDESK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        let prefix = crate::env_prefix();
        if let Ok(value) = std::env::var(format!("{prefix}_DATABASE")) {
            self.database = Self::expand_path(&value);
        }
        if let Ok(value) = std::env::var(format!("{prefix}_CACHE")) {
            self.cache_path = Self::expand_path(&value);
        }
        if let Ok(value) = std::env::var(format!("{prefix}_REPLY_ENDPOINT")) {
            self.reply.endpoint = if value.trim().is_empty() {
                None
            } else {
                Some(value)
            };
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chat.sync_window == 0 {
            return Err(Error::Config("chat.sync_window must be at least 1".into()));
        }
        if self.bus.capacity == 0 {
            return Err(Error::Config("bus.capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Chat widget lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Quiescent period before an open session is auto-closed.
    pub inactivity_timeout_secs: u64,

    /// Optional sub-second override, used by tests and demos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_ms: Option<u64>,

    /// How many trailing messages each sync pass reconciles.
    pub sync_window: usize,

    /// Mark the session ended and resolved after every completed turn.
    pub soft_close_after_turn: bool,

    /// Greeting shown when a session starts with an empty log.
    pub welcome_message: String,

    /// Bot turn appended when reply generation fails.
    pub apology_message: String,

    /// System message appended when the inactivity timer fires.
    pub auto_close_message: String,
}

impl ChatConfig {
    /// Effective inactivity period.
    pub fn inactivity_timeout(&self) -> Duration {
        match self.inactivity_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.inactivity_timeout_secs),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 300,
            inactivity_timeout_ms: None,
            sync_window: 2,
            soft_close_after_turn: true,
            welcome_message: "Hi! Ask me anything about our products and documentation."
                .to_string(),
            apology_message:
                "Sorry, I'm having trouble answering right now. Please try again in a moment."
                    .to_string(),
            auto_close_message:
                "This chat was closed after 5 minutes of inactivity. How did we do?".to_string(),
        }
    }
}

/// Fan-out bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber buffer; slower subscribers lag and drop events.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// AI reply collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Endpoint receiving `{history, productId}` and returning `{reply, suggestSwitchProduct}`.
    pub endpoint: Option<String>,

    /// Request timeout in seconds (0 uses the client default).
    pub timeout_secs: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
