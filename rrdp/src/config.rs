use crate::{
    payload::ProtocolVersion,
    reporter::{MIN_INTERVAL, ReportOptions, Target},
};
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::time::Duration;

// Parses a duration string (e.g., "5s", "500ms") into a `Duration`.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// How the binary drives the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Reporting loop on the main task, stopped by interrupt.
    #[default]
    Sync,
    /// Reporting loop on a background task, stopped by cancel.
    Async,
}

/// Corresponds to the [plugin] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct PluginConfig {
    #[serde(default = "PluginConfig::default_uid")]
    pub uid: String,

    #[serde(default = "PluginConfig::default_protocol")]
    pub protocol: ProtocolVersion,

    #[serde(default)]
    pub mode: RunMode,
}

impl PluginConfig {
    fn default_uid() -> String {
        "loadavg".to_string()
    }

    fn default_protocol() -> ProtocolVersion {
        ProtocolVersion::V2
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            uid: Self::default_uid(),
            protocol: Self::default_protocol(),
            mode: RunMode::default(),
        }
    }
}

/// Corresponds to the [local] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    // Interval registered with the collector.
    #[serde(
        default = "LocalConfig::default_interval",
        deserialize_with = "parse_duration"
    )]
    pub interval: Duration,

    // Lead time before the collector's next read.
    #[serde(
        default = "LocalConfig::default_neg_shift",
        deserialize_with = "parse_duration"
    )]
    pub neg_shift: Duration,
}

impl LocalConfig {
    fn default_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_neg_shift() -> Duration {
        Duration::from_millis(500)
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            interval: Self::default_interval(),
            neg_shift: Self::default_neg_shift(),
        }
    }
}

/// Corresponds to the [collector] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "CollectorConfig::default_url")]
    pub url: String,

    #[serde(
        default = "CollectorConfig::default_timeout",
        deserialize_with = "parse_duration"
    )]
    pub timeout: Duration,
}

impl CollectorConfig {
    fn default_url() -> String {
        "http://127.0.0.1:4094".to_string()
    }

    fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            timeout: Self::default_timeout(),
        }
    }
}

/// Corresponds to the [interdomain] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct InterdomainConfig {
    // Id of the domain this plugin runs in.
    #[serde(default)]
    pub domid: u32,

    #[serde(default = "InterdomainConfig::default_store_root")]
    pub store_root: PathBuf,

    #[serde(default = "InterdomainConfig::default_page_dir")]
    pub page_dir: PathBuf,
}

impl InterdomainConfig {
    fn default_store_root() -> PathBuf {
        PathBuf::from("/var/run/rrdp/store")
    }

    fn default_page_dir() -> PathBuf {
        PathBuf::from("/var/run/rrdp/pages")
    }
}

impl Default for InterdomainConfig {
    fn default() -> Self {
        Self {
            domid: 0,
            store_root: Self::default_store_root(),
            page_dir: Self::default_page_dir(),
        }
    }
}

/// Corresponds to the [log] section in the TOML config file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    // Log to this file instead of stdout.
    pub file: Option<PathBuf>,
}

/// Represents the overall application configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub plugin: PluginConfig,

    #[serde(default)]
    pub target: Target,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub interdomain: InterdomainConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn new(config_path: &PathBuf) -> Result<Self> {
        Self::load_from_file(config_path)
    }

    // Loads configuration from a TOML file.
    fn load_from_file(config_path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        let config = toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.local.interval >= MIN_INTERVAL,
            "[local] interval must be at least {:?}, got {:?}",
            MIN_INTERVAL,
            self.local.interval
        );
        Ok(())
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            uid: self.plugin.uid.clone(),
            protocol: self.plugin.protocol,
            target: self.target,
            interval: self.local.interval,
            neg_shift: self.local.neg_shift,
        }
    }
}
