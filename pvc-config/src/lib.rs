//! Loads the node daemon's YAML configuration file.
//!
//! The path is taken from the `PVC_CONFIG_FILE` environment variable, falling back to
//! `/etc/pvc/pvcd.yml` if unset.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE_ENV: &str = "PVC_CONFIG_FILE";
const DEFAULT_CONFIG_PATH: &str = "/etc/pvc/pvcd.yml";

fn default_keepalive_interval() -> u64 {
    5
}
fn default_fence_intervals() -> u64 {
    6
}
fn default_suicide_intervals() -> u64 {
    0
}
fn default_store_disconnect_deadline() -> u64 {
    300
}
fn default_migration_fallback() -> bool {
    true
}
fn default_fence_policy() -> String {
    "none".to_string()
}
fn default_migration_target_selector() -> String {
    "mem".to_string()
}
fn default_migration_receive_timeout() -> u64 {
    90
}
fn default_log_directory() -> PathBuf {
    PathBuf::from("/var/log/pvc")
}
fn default_dynamic_directory() -> PathBuf {
    PathBuf::from("/run/pvc")
}

/// Top-level node daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// CSV list of coordinator hostnames; also the store connection string.
    pub coordinators: String,

    pub vni_dev: String,
    pub vni_floating_ip: String,
    pub upstream_dev: String,
    pub upstream_floating_ip: String,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    #[serde(default = "default_fence_intervals")]
    pub fence_intervals: u64,
    #[serde(default = "default_suicide_intervals")]
    pub suicide_intervals: u64,

    #[serde(default = "default_fence_policy")]
    pub successful_fence: String,
    #[serde(default = "default_fence_policy")]
    pub failed_fence: String,

    /// Whether an outbound migration that fails live-migration falls back to a
    /// graceful shutdown plus cold start on the target. Independent of whether
    /// `migration_method` was left unset or set explicitly to `live`.
    #[serde(default = "default_migration_fallback")]
    pub migration_fallback: bool,

    #[serde(default = "default_migration_target_selector")]
    pub migration_target_selector: String,

    /// How long the receiving side of an inbound migration waits for the domain to
    /// appear via the migration protocol before giving up.
    #[serde(default = "default_migration_receive_timeout")]
    pub migration_receive_timeout_secs: u64,

    #[serde(default)]
    pub ipmi_hostname: String,
    #[serde(default)]
    pub ipmi_username: String,
    #[serde(default)]
    pub ipmi_password: String,

    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_dynamic_directory")]
    pub dynamic_directory: PathBuf,

    /// Seconds of total store unavailability after which the daemon exits non-zero for
    /// supervisor restart; permanent loss is treated as fatal rather than retried
    /// forever.
    #[serde(default = "default_store_disconnect_deadline")]
    pub store_disconnect_deadline: u64,

    #[serde(default)]
    pub enable_networking: bool,
    #[serde(default)]
    pub enable_api: bool,
}

impl Config {
    pub fn coordinator_list(&self) -> Vec<&str> {
        self.coordinators.split(',').map(str::trim).collect()
    }

    pub fn dnsmasq_dynamic_directory(&self) -> PathBuf {
        self.dynamic_directory.join("dnsmasq")
    }
    pub fn pdns_dynamic_directory(&self) -> PathBuf {
        self.dynamic_directory.join("pdns")
    }
    pub fn nft_dynamic_directory(&self) -> PathBuf {
        self.dynamic_directory.join("nft")
    }
    pub fn dnsmasq_log_directory(&self) -> PathBuf {
        self.log_directory.join("dnsmasq")
    }
    pub fn pdns_log_directory(&self) -> PathBuf {
        self.log_directory.join("pdns")
    }
    pub fn nft_log_directory(&self) -> PathBuf {
        self.log_directory.join("nft")
    }
}

/// Resolves the configuration path from `PVC_CONFIG_FILE`, defaulting to
/// `/etc/pvc/pvcd.yml`.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads and parses the configuration file at `path`.
pub fn load_from(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Loads the configuration from the path named by `PVC_CONFIG_FILE`.
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
coordinators: "node1,node2,node3"
vni_dev: "bond0.100"
vni_floating_ip: "10.0.0.1/24"
upstream_dev: "bond0"
upstream_floating_ip: "192.168.1.10/24"
"#;

    #[test]
    fn defaults_fill_in_unset_tunables() {
        let config: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
        assert_eq!(config.keepalive_interval, 5);
        assert_eq!(config.fence_intervals, 6);
        assert_eq!(config.suicide_intervals, 0);
        assert!(config.migration_fallback);
        assert_eq!(config.migration_target_selector, "mem");
        assert_eq!(config.migration_receive_timeout_secs, 90);
    }

    #[test]
    fn coordinator_list_splits_csv() {
        let config: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
        assert_eq!(config.coordinator_list(), vec!["node1", "node2", "node3"]);
    }

    #[test]
    fn derived_directories_nest_under_dynamic_directory() {
        let config: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
        assert_eq!(
            config.nft_dynamic_directory(),
            config.dynamic_directory.join("nft")
        );
    }

    #[test]
    fn unknown_field_is_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nbogus_field: 1\n");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }
}
