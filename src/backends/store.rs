// Bandwidth rule sources for the sync workflow

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Address type tag for externally routed addresses
pub const EXTERNAL_IP_TYPE: &str = "E";

/// One row of the rule store: an address and its bandwidth in mbit/s
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthRule {
    pub ip: String,
    pub bandwidth: u64,
    #[serde(default)]
    pub ip_type: Option<String>,
}

impl BandwidthRule {
    fn is_external(&self) -> bool {
        self.ip_type
            .as_deref()
            .is_none_or(|t| t.eq_ignore_ascii_case(EXTERNAL_IP_TYPE))
    }
}

/// Source of per-host bandwidth rules
pub trait RuleStore {
    /// Human-readable name for logs
    fn name(&self) -> String;

    /// All rules that should be applied, read once per sync run
    fn get_bandwidths(&self) -> Result<Vec<BandwidthRule>>;
}

/// Rules kept in a JSON file: `[{"ip": "...", "bandwidth": 10, "ip_type": "E"}]`
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse rules and keep only externally routed addresses
    pub fn parse(contents: &str) -> Result<Vec<BandwidthRule>> {
        let rules: Vec<BandwidthRule> =
            serde_json::from_str(contents).context("Failed to parse bandwidth rules")?;

        Ok(rules.into_iter().filter(BandwidthRule::is_external).collect())
    }
}

impl RuleStore for JsonRuleStore {
    fn name(&self) -> String {
        format!("json:{}", self.path.display())
    }

    fn get_bandwidths(&self) -> Result<Vec<BandwidthRule>> {
        let contents = fs::read_to_string(&self.path)
            .context(format!("Failed to read rules file: {:?}", self.path))?;

        let rules = Self::parse(&contents)?;
        if rules.is_empty() {
            log::warn!("No bandwidth rules found in {:?}", self.path);
        } else {
            log::info!("Loaded {} bandwidth rule(s) from {:?}", rules.len(), self.path);
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_internal_addresses() {
        let json = r#"[
            {"ip": "223.202.61.10", "bandwidth": 10, "ip_type": "E"},
            {"ip": "192.168.0.5", "bandwidth": 100, "ip_type": "I"},
            {"ip": "223.202.61.11", "bandwidth": 5}
        ]"#;

        let rules = JsonRuleStore::parse(json).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].ip, "223.202.61.10");
        assert_eq!(rules[0].bandwidth, 10);
        assert_eq!(rules[1].ip, "223.202.61.11");
        assert_eq!(rules[1].ip_type, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(JsonRuleStore::parse("{\"ip\": 1}").is_err());
        assert!(JsonRuleStore::parse("[{\"ip\": \"1.1.1.1\"}]").is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let store = JsonRuleStore::new("/nonexistent/tcshaper/rules.json");
        assert!(store.get_bandwidths().is_err());
        assert_eq!(store.name(), "json:/nonexistent/tcshaper/rules.json");
    }
}
