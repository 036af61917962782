// Configuration loading

use crate::rate::Rate;
use crate::tc::TcSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "tcshaper";
const CONFIG_FILE: &str = "config.json";

/// Settings for the `sync` subcommand
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// JSON file with bandwidth rules
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Only rules for addresses inside this IPv4 range are applied
    #[serde(default = "default_cidr")]
    pub cidr: String,

    #[serde(default = "default_device")]
    pub device: String,

    /// Deadline for a whole sync pass
    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            cidr: default_cidr(),
            device: default_device(),
            timeout_secs: default_sync_timeout(),
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Ceiling of the top-level `1:1` class
    #[serde(default = "default_max_rate")]
    pub max_rate: String,

    /// Class minor (as tc writes it) for unclassified traffic
    #[serde(default = "default_class")]
    pub default_class: String,

    #[serde(default = "default_filter_prio")]
    pub filter_prio: u32,

    #[serde(default = "default_sfq_perturb")]
    pub sfq_perturb: u32,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Device -> IFB device, overrides the ifb0/ifb1 convention
    #[serde(default)]
    pub ifb_devices: HashMap<String, String>,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_max_rate() -> String {
    "10gbit".to_string()
}

fn default_class() -> String {
    "300".to_string()
}

fn default_filter_prio() -> u32 {
    10
}

fn default_sfq_perturb() -> u32 {
    10
}

fn default_protocol() -> String {
    "ip".to_string()
}

fn default_cidr() -> String {
    "223.202.61.0/26".to_string()
}

fn default_device() -> String {
    "eth0".to_string()
}

fn default_sync_timeout() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_rate: default_max_rate(),
            default_class: default_class(),
            filter_prio: default_filter_prio(),
            sfq_perturb: default_sfq_perturb(),
            protocol: default_protocol(),
            ifb_devices: HashMap::new(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Default config file path (`~/.config/tcshaper/config.json`)
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !path.exists() {
            if explicit {
                return Err(anyhow!("Config file not found: {:?}", path));
            }
            log::debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(&path).context(format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&contents)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config file")
    }

    /// Controller settings derived from this config
    pub fn tc_settings(&self) -> Result<TcSettings> {
        let max_rate: Rate = self
            .max_rate
            .parse()
            .context(format!("Invalid max_rate {:?}", self.max_rate))?;

        let default_class = u32::from_str_radix(self.default_class.trim_start_matches("0x"), 16)
            .ok()
            .filter(|minor| *minor <= 0xffff)
            .ok_or_else(|| anyhow!("Invalid default_class {:?}", self.default_class))?;

        Ok(TcSettings {
            max_rate,
            default_class,
            filter_prio: self.filter_prio,
            sfq_perturb: self.sfq_perturb,
            protocol: self.protocol.clone(),
            ifb_devices: self.ifb_devices.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_rate, "10gbit");
        assert_eq!(config.sync.cidr, "223.202.61.0/26");
        assert_eq!(config.sync.timeout_secs, 300);

        let settings = config.tc_settings().unwrap();
        assert_eq!(settings.default_class, 0x300);
        assert_eq!(settings.max_rate.as_str(), "10gbit");
        assert_eq!(settings.filter_prio, 10);
        assert_eq!(settings.sfq_perturb, 10);
        assert_eq!(settings.protocol, "ip");
    }

    #[test]
    fn test_defaults_match_controller_defaults() {
        assert_eq!(Config::default().tc_settings().unwrap(), TcSettings::default());
    }

    #[test]
    fn test_partial_config() {
        let json = r#"{
            "max_rate": "1gbit",
            "default_class": "0x999",
            "ifb_devices": {"enp3s0": "ifb3"},
            "sync": {"rules_path": "/etc/tcshaper/rules.json", "device": "eth1"}
        }"#;

        let config = Config::parse(json).unwrap();
        assert_eq!(config.ifb_devices.get("enp3s0").map(String::as_str), Some("ifb3"));
        assert_eq!(config.sync.device, "eth1");
        assert_eq!(config.sync.cidr, "223.202.61.0/26");
        assert_eq!(
            config.sync.rules_path,
            Some(PathBuf::from("/etc/tcshaper/rules.json"))
        );

        let settings = config.tc_settings().unwrap();
        assert_eq!(settings.default_class, 0x999);
        assert_eq!(settings.max_rate.as_str(), "1gbit");
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = Config::default();
        config.max_rate = "fast".to_string();
        assert!(config.tc_settings().is_err());

        let mut config = Config::default();
        config.default_class = "xyz".to_string();
        assert!(config.tc_settings().is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_explicit_file() {
        assert!(Config::load(Some(Path::new("/nonexistent/tcshaper.json"))).is_err());
    }
}
