//! Gateway configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub admin: AdminSettings,
    #[serde(default)]
    pub console: ConsoleSettings,
    /// Audit logging configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address the HTTP surface listens on
    pub listen_addr: String,
    pub log_level: String,
}

/// Administrator credential settings
///
/// Admin requests authenticate with HTTP Basic auth (user `admin`) or a
/// bearer token, in both cases carrying this secret.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminSettings {
    /// Admin secret inline in the config file
    #[serde(default)]
    pub token: String,
    /// Read the admin secret from this file instead (first line, trimmed)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl std::fmt::Debug for AdminSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSettings")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("token_file", &self.token_file)
            .finish()
    }
}

impl AdminSettings {
    /// Resolve the effective admin secret
    ///
    /// An empty secret disables every admin operation.
    pub fn resolve_token(&self) -> Result<String> {
        match &self.token_file {
            Some(path) => {
                let path = expand_path(path);
                let content = fs::read_to_string(&path).with_context(|| {
                    format!("Failed to read admin token file: {}", path.display())
                })?;
                Ok(content.lines().next().unwrap_or_default().trim().to_string())
            }
            None => Ok(self.token.clone()),
        }
    }
}

/// Which console driver backs node connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Shell out to `ipmitool` (serial-over-LAN, chassis power)
    #[default]
    Ipmitool,
    /// Simulated consoles that count upwards; for demos and tests
    Dummy,
}

impl std::str::FromStr for DriverKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ipmitool" => Ok(Self::Ipmitool),
            "dummy" => Ok(Self::Dummy),
            other => Err(anyhow!(
                "Unknown driver '{}', must be one of: ipmitool, dummy",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default)]
    pub driver: DriverKind,
    /// Console units buffered per viewer before the viewer is disconnected
    #[serde(default = "ConsoleSettings::default_subscriber_queue")]
    pub subscriber_queue: usize,
    /// Path or name of the ipmitool binary
    #[serde(default = "ConsoleSettings::default_ipmitool_path")]
    pub ipmitool_path: PathBuf,
    /// Interval between lines emitted by the dummy driver
    #[serde(default = "ConsoleSettings::default_dummy_interval_ms")]
    pub dummy_interval_ms: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            subscriber_queue: Self::default_subscriber_queue(),
            ipmitool_path: Self::default_ipmitool_path(),
            dummy_interval_ms: Self::default_dummy_interval_ms(),
        }
    }
}

impl ConsoleSettings {
    fn default_subscriber_queue() -> usize {
        256
    }

    fn default_ipmitool_path() -> PathBuf {
        PathBuf::from("ipmitool")
    }

    fn default_dummy_interval_ms() -> u64 {
        100
    }

    pub fn dummy_interval(&self) -> Duration {
        Duration::from_millis(self.dummy_interval_ms)
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging
    #[serde(default)]
    pub enabled: bool,
    /// Path to audit log file
    #[serde(default = "AuditConfig::default_path")]
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: Self::default_path(),
        }
    }
}

impl AuditConfig {
    fn default_path() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            data_dir.join("console-gateway").join("audit.log")
        } else {
            PathBuf::from("/var/log/console-gateway/audit.log")
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen_addr: "127.0.0.1:8080".to_string(),
                log_level: "info".to_string(),
            },
            admin: AdminSettings::default(),
            console: ConsoleSettings::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/console-gateway/gateway.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: GatewayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("console-gateway").join("gateway.toml")
        } else {
            PathBuf::from(".config/console-gateway/gateway.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| {
                anyhow!(
                    "Invalid listen_addr '{}', expected HOST:PORT (e.g., '127.0.0.1:8080')",
                    self.server.listen_addr
                )
            })?;

        if self.console.subscriber_queue == 0 {
            return Err(anyhow!("console.subscriber_queue must be at least 1"));
        }

        if self.console.driver == DriverKind::Ipmitool
            && self.console.ipmitool_path.as_os_str().is_empty()
        {
            return Err(anyhow!("console.ipmitool_path must not be empty"));
        }

        if self.console.driver == DriverKind::Dummy && self.console.dummy_interval_ms == 0 {
            return Err(anyhow!("console.dummy_interval_ms must be at least 1"));
        }

        Ok(())
    }
}

/// Expand a leading `~` in a configured path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
