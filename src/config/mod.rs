mod selectors;

pub use selectors::{parse_marker_list, SelectorConfig};

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CartwatchError, Result};
use crate::storage::FileStore;
use crate::watcher::{MatchPolicy, Mode, Timing};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Browser connection
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Catalog page the watcher attaches to
    #[serde(default)]
    pub target: TargetConfig,

    /// Monitoring behaviour
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// DOM selectors for the catalog page
    #[serde(default)]
    pub selectors: SelectorConfig,

    /// Local status bridge
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Shared toggle/filter storage
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// CDP port or HTTP endpoint (e.g. "9222" or "http://127.0.0.1:9222")
    #[serde(default = "default_cdp")]
    pub cdp: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { cdp: default_cdp() }
    }
}

fn default_cdp() -> String {
    "9222".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Substring the catalog tab's URL must contain
    #[serde(default = "default_target_host")]
    pub host: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_target_host(),
        }
    }
}

fn default_target_host() -> String {
    "coins.bank.gov.ua".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    /// Matching policy; the mode's default when unset
    pub matching: Option<MatchPolicy>,

    /// Override of the scanning period in milliseconds
    pub scan_interval_ms: Option<u64>,

    /// Override of the reload period in milliseconds
    pub reload_interval_ms: Option<u64>,

    /// Override of the wait-for-content retry period in milliseconds
    pub content_retry_ms: Option<u64>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            matching: None,
            scan_interval_ms: None,
            reload_interval_ms: None,
            content_retry_ms: None,
        }
    }
}

fn default_mode() -> Mode {
    Mode::Continuous
}

impl WatcherConfig {
    pub fn policy(&self) -> MatchPolicy {
        self.matching.unwrap_or_else(|| self.mode.default_policy())
    }

    /// Mode defaults with any configured overrides applied.
    pub fn timing(&self) -> Timing {
        // Timers cannot tick with a zero period; zero falls back to the mode default.
        let positive = |ms: Option<u64>| ms.filter(|ms| *ms > 0);
        let mut timing = Timing::for_mode(self.mode);
        if let Some(ms) = positive(self.scan_interval_ms) {
            timing.scan_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = positive(self.reload_interval_ms) {
            timing.reload_interval = Duration::from_millis(ms);
        }
        if let (Some(ms), Some(_)) = (positive(self.content_retry_ms), timing.content_retry) {
            timing.content_retry = Some(Duration::from_millis(ms));
        }
        timing
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Loopback port of the status bridge
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
        }
    }
}

fn default_bridge_port() -> u16 {
    19233
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage file path (defaults to the local data directory)
    pub path: Option<String>,

    /// How often the watcher re-reads the storage file
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl StorageConfig {
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => Ok(PathBuf::from(path)),
            None => FileStore::default_path(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Keys accepted by `config get` / `config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "browser.cdp",
    "target.host",
    "watcher.mode",
    "watcher.matching",
    "watcher.scan_interval_ms",
    "watcher.reload_interval_ms",
    "watcher.content_retry_ms",
    "selectors.container",
    "selectors.name",
    "selectors.action",
    "selectors.triggered_markers",
    "selectors.unavailable_markers",
    "bridge.port",
    "storage.path",
    "storage.poll_interval_ms",
];

impl Config {
    /// Load configuration from all sources (file, env, defaults)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load with `path` as the config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Merge config file if exists
            .merge(Toml::file(path))
            // Merge environment variables (CARTWATCH_WATCHER__MODE, ...)
            .merge(Env::prefixed("CARTWATCH_").split("__"))
            .extract()
            .map_err(|e| CartwatchError::ConfigError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values no source may supply, whichever layer they came from.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("watcher.scan_interval_ms", self.watcher.scan_interval_ms),
            ("watcher.reload_interval_ms", self.watcher.reload_interval_ms),
            ("watcher.content_retry_ms", self.watcher.content_retry_ms),
            ("storage.poll_interval_ms", Some(self.storage.poll_interval_ms)),
        ];
        for (key, value) in periods {
            if value == Some(0) {
                return Err(CartwatchError::ConfigError(format!(
                    "{} must be a positive number of milliseconds",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cartwatch")
            .join("config.toml")
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CartwatchError::ConfigError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read one value by dotted key. `None` means the key is unset.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = match key {
            "browser.cdp" => Some(self.browser.cdp.clone()),
            "target.host" => Some(self.target.host.clone()),
            "watcher.mode" => Some(self.watcher.mode.to_string()),
            "watcher.matching" => self.watcher.matching.map(|p| match p {
                MatchPolicy::Contains => "contains".to_string(),
                MatchPolicy::Exact => "exact".to_string(),
            }),
            "watcher.scan_interval_ms" => self.watcher.scan_interval_ms.map(|v| v.to_string()),
            "watcher.reload_interval_ms" => {
                self.watcher.reload_interval_ms.map(|v| v.to_string())
            }
            "watcher.content_retry_ms" => self.watcher.content_retry_ms.map(|v| v.to_string()),
            "selectors.container" => Some(self.selectors.container.clone()),
            "selectors.name" => Some(self.selectors.name.clone()),
            "selectors.action" => Some(self.selectors.action.clone()),
            "selectors.triggered_markers" => Some(self.selectors.triggered_markers.join(",")),
            "selectors.unavailable_markers" => {
                Some(self.selectors.unavailable_markers.join(","))
            }
            "bridge.port" => Some(self.bridge.port.to_string()),
            "storage.path" => self.storage.path.clone(),
            "storage.poll_interval_ms" => Some(self.storage.poll_interval_ms.to_string()),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Set one value by dotted key, validating it first.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "browser.cdp" => self.browser.cdp = value.trim().to_string(),
            "target.host" => self.target.host = value.trim().to_string(),
            "watcher.mode" => {
                self.watcher.mode = value.parse().map_err(CartwatchError::ConfigError)?
            }
            "watcher.matching" => {
                self.watcher.matching = if value.trim().is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(CartwatchError::ConfigError)?)
                }
            }
            "watcher.scan_interval_ms" => self.watcher.scan_interval_ms = parse_millis(key, value)?,
            "watcher.reload_interval_ms" => {
                self.watcher.reload_interval_ms = parse_millis(key, value)?
            }
            "watcher.content_retry_ms" => self.watcher.content_retry_ms = parse_millis(key, value)?,
            "selectors.container" => self.selectors.container = value.to_string(),
            "selectors.name" => self.selectors.name = value.to_string(),
            "selectors.action" => self.selectors.action = value.to_string(),
            "selectors.triggered_markers" => {
                self.selectors.triggered_markers = parse_marker_list(value)
            }
            "selectors.unavailable_markers" => {
                self.selectors.unavailable_markers = parse_marker_list(value)
            }
            "bridge.port" => {
                self.bridge.port = value.trim().parse().map_err(|_| {
                    CartwatchError::ConfigError("bridge.port must be a port number".to_string())
                })?
            }
            "storage.path" => {
                self.storage.path = Some(value.trim().to_string()).filter(|p| !p.is_empty())
            }
            "storage.poll_interval_ms" => {
                self.storage.poll_interval_ms = parse_millis(key, value)?.ok_or_else(|| {
                    CartwatchError::ConfigError(format!("{} cannot be empty", key))
                })?
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> CartwatchError {
    CartwatchError::ConfigError(format!(
        "Unknown config key: {} (known keys: {})",
        key,
        CONFIG_KEYS.join(", ")
    ))
}

/// Empty clears an optional override.
fn parse_millis(key: &str, value: &str) -> Result<Option<u64>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(ms)),
        _ => Err(CartwatchError::ConfigError(format!(
            "{} must be a positive number of milliseconds",
            key
        ))),
    }
}
