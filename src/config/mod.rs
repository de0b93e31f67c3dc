//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;

/// Which record-store adapter is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Local tiers only; sync operations are no-ops.
    #[default]
    Local,
    /// Every operation is a remote call.
    Remote,
    /// Local-first with best-effort remote mirroring.
    Hybrid,
}

impl StorageMode {
    /// Returns the mode as its config string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parses a mode string, defaulting unknown values to `Local`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "remote" => Self::Remote,
            "hybrid" => Self::Hybrid,
            _ => Self::Local,
        }
    }
}

/// Runtime synchronization settings.
///
/// Owned by the sync orchestrator and replaced wholesale on every update;
/// individual fields are never mutated in place, so the adapter/timer pair
/// can never observe a half-applied configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Active adapter selection.
    pub mode: StorageMode,
    /// Outbound sync cadence in milliseconds; 0 disables the timer.
    pub sync_interval_ms: u64,
    /// Retry ceiling for individual remote requests.
    pub max_retries: u32,
    /// When set, remote mirroring and the timer are suppressed entirely.
    pub offline_mode_enabled: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            sync_interval_ms: 0,
            max_retries: 3,
            offline_mode_enabled: false,
        }
    }
}

impl SyncSettings {
    /// Creates settings with default values (local mode, no timer).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the sync interval in milliseconds.
    #[must_use]
    pub const fn with_sync_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sync_interval_ms = interval_ms;
        self
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the offline-mode flag.
    #[must_use]
    pub const fn with_offline_mode(mut self, enabled: bool) -> Self {
        self.offline_mode_enabled = enabled;
        self
    }
}

/// Main configuration for daybook.
#[derive(Debug, Clone)]
pub struct DaybookConfig {
    /// Directory holding the local databases and the degraded-tier file.
    pub data_dir: PathBuf,
    /// Base URL of the remote replica, e.g. `https://api.example.com`.
    pub api_base_url: Option<String>,
    /// Bearer token for the remote replica.
    pub api_token: Option<String>,
    /// Runtime sync settings.
    pub sync: SyncSettings,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Remote replica base URL.
    pub api_base_url: Option<String>,
    /// Remote replica bearer token.
    pub api_token: Option<String>,
    /// Sync section.
    pub sync: Option<ConfigFileSync>,
}

/// Sync section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSync {
    /// Storage mode: "local", "remote", "hybrid".
    pub mode: Option<String>,
    /// Sync interval in milliseconds.
    pub interval_ms: Option<u64>,
    /// Retry ceiling for remote requests.
    pub max_retries: Option<u32>,
    /// Offline mode flag.
    pub offline: Option<bool>,
}

impl Default for DaybookConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".daybook"),
            api_base_url: None,
            api_token: None,
            sync: SyncSettings::default(),
        }
    }
}

impl DaybookConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/daybook/` on macOS)
    /// 2. XDG config dir (`~/.config/daybook/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found. Environment
    /// overrides (`DAYBOOK_API_URL`, `DAYBOOK_API_TOKEN`) are applied last.
    #[must_use]
    pub fn load_default() -> Self {
        let config = Self::load_from_default_paths().unwrap_or_default();
        config.with_env_overrides()
    }

    fn load_from_default_paths() -> Option<Self> {
        let base_dirs = directories::BaseDirs::new()?;

        let platform_config = base_dirs.config_dir().join("daybook").join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return Some(config);
            }
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("daybook")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return Some(config);
            }
        }

        None
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DAYBOOK_API_URL") {
            if !url.is_empty() {
                self.api_base_url = Some(url);
            }
        }
        if let Ok(token) = std::env::var("DAYBOOK_API_TOKEN") {
            if !token.is_empty() {
                self.api_token = Some(token);
            }
        }
        self
    }

    /// Converts a `ConfigFile` to `DaybookConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        config.api_base_url = file.api_base_url;
        config.api_token = file.api_token;

        if let Some(sync) = file.sync {
            if let Some(mode) = sync.mode {
                config.sync.mode = StorageMode::parse(&mode);
            }
            if let Some(interval) = sync.interval_ms {
                config.sync.sync_interval_ms = interval;
            }
            if let Some(retries) = sync.max_retries {
                config.sync.max_retries = retries;
            }
            if let Some(offline) = sync.offline {
                config.sync.offline_mode_enabled = offline;
            }
        }

        config
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the remote replica base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the remote replica bearer token.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Sets the sync settings.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncSettings) -> Self {
        self.sync = sync;
        self
    }
}
