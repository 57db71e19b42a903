use anyhow::{Context, Result};
use chrono::FixedOffset;
use inventory_sync_core::reconcile::{AbsentTimestampPolicy, ReconcileOptions};
use inventory_sync_core::timestamp::parse_utc_offset;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub ocs: Option<OcsConfig>,
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// OCS Inventory MySQL connection.
#[derive(Debug, Deserialize, Clone)]
pub struct OcsConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Name of the environment variable holding the password.
    #[serde(default = "default_ocs_password_env")]
    pub password_env: String,
    /// Maximum rows to fetch per cycle; 0 means no limit.
    #[serde(default)]
    pub limit: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_mysql_port() -> u16 {
    3306
}
fn default_ocs_password_env() -> String {
    "OCS_DB_PASS".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_acquire_timeout_secs() -> u64 {
    10
}

/// Active Directory (LDAP) connection.
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    pub host: String,
    #[serde(default = "default_ldap_port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub use_starttls: bool,
    pub bind_dn: String,
    #[serde(default = "default_ldap_password_env")]
    pub password_env: String,
    pub search_base: String,
    #[serde(default = "default_ldap_filter")]
    pub filter: String,
    #[serde(default = "default_ldap_page_size")]
    pub page_size: i32,
    #[serde(default = "default_ldap_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ldap_port() -> u16 {
    389
}
fn default_ldap_password_env() -> String {
    "LDAP_BIND_PASSWORD".to_string()
}
fn default_ldap_filter() -> String {
    "(objectClass=computer)".to_string()
}
fn default_ldap_page_size() -> i32 {
    500
}
fn default_ldap_timeout_secs() -> u64 {
    10
}

/// Elasticsearch index.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub url: String,
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_index_password_env")]
    pub password_env: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_index_password_env() -> String {
    "ELASTICSEARCH_PASS".to_string()
}
fn default_index_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Page size used when enumerating index document ids.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Allow deleting every index document when both sources come back empty.
    #[serde(default)]
    pub allow_empty_purge: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            page_size: default_page_size(),
            allow_empty_purge: false,
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    500
}
fn default_max_concurrent_batches() -> usize {
    4
}
fn default_page_size() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub absent_timestamp_policy: AbsentTimestampPolicy,
    /// Offset for timestamps that carry no zone, e.g. `+07:00`.
    #[serde(default = "default_source_utc_offset")]
    pub source_utc_offset: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            absent_timestamp_policy: AbsentTimestampPolicy::default(),
            source_utc_offset: default_source_utc_offset(),
        }
    }
}

fn default_source_utc_offset() -> String {
    "+00:00".to_string()
}

impl ReconcileConfig {
    pub fn source_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.source_utc_offset)
            .with_context(|| "Invalid reconcile.source_utc_offset")
    }

    pub fn options(&self) -> Result<ReconcileOptions> {
        Ok(ReconcileOptions {
            absent_policy: self.absent_timestamp_policy,
            source_offset: self.source_offset()?,
        })
    }
}

impl Config {
    /// Defaults only, for commands that never touch a service.
    pub fn minimal() -> Self {
        Self {
            ocs: None,
            directory: None,
            index: None,
            sync: SyncConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }

    pub fn require_ocs(&self) -> Result<&OcsConfig> {
        self.ocs
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No [ocs] section in config"))
    }

    pub fn require_directory(&self) -> Result<&DirectoryConfig> {
        self.directory
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No [directory] section in config"))
    }

    pub fn require_index(&self) -> Result<&IndexConfig> {
        self.index
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No [index] section in config"))
    }
}

/// Read a secret from the environment variable named by a `password_env` key.
pub fn secret_from_env(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("Environment variable {} is not set", var))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate sync
    if config.sync.interval_secs == 0 {
        anyhow::bail!("sync.interval_secs must be > 0");
    }
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }
    if config.sync.max_concurrent_batches == 0 {
        anyhow::bail!("sync.max_concurrent_batches must be > 0");
    }
    if config.sync.page_size == 0 {
        anyhow::bail!("sync.page_size must be > 0");
    }

    config.reconcile.source_offset()?;

    if let Some(dir) = &config.directory {
        if dir.use_ssl && dir.use_starttls {
            anyhow::bail!("directory.use_ssl and directory.use_starttls are mutually exclusive");
        }
        if dir.page_size <= 0 {
            anyhow::bail!("directory.page_size must be > 0");
        }
    }

    if let Some(index) = &config.index {
        if index.index.trim().is_empty() {
            anyhow::bail!("index.index must not be empty");
        }
        reqwest::Url::parse(&index.url)
            .with_context(|| format!("index.url is not a valid URL: '{}'", index.url))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[ocs]
host = "ocs-db.internal"
database = "ocsweb"
user = "ocs"
limit = 100

[directory]
host = "dc01.corp.local"
bind_dn = "CN=svc-sync,OU=Service,DC=corp,DC=local"
search_base = "DC=corp,DC=local"

[index]
url = "http://localhost:9200"
index = "computers"

[sync]
interval_secs = 120
batch_size = 250

[reconcile]
absent_timestamp_policy = "assume_inactive"
source_utc_offset = "+07:00"
"#;

    #[test]
    fn test_full_config_with_defaults() {
        let cfg = parse_config(FULL).unwrap();
        let ocs = cfg.require_ocs().unwrap();
        assert_eq!(ocs.port, 3306);
        assert_eq!(ocs.password_env, "OCS_DB_PASS");
        assert_eq!(ocs.limit, 100);
        let dir = cfg.require_directory().unwrap();
        assert_eq!(dir.port, 389);
        assert_eq!(dir.filter, "(objectClass=computer)");
        assert_eq!(dir.page_size, 500);
        let index = cfg.require_index().unwrap();
        assert_eq!(index.password_env, "ELASTICSEARCH_PASS");
        assert!(index.username.is_none());
        assert_eq!(cfg.sync.interval_secs, 120);
        assert_eq!(cfg.sync.batch_size, 250);
        assert_eq!(cfg.sync.max_concurrent_batches, 4);
        assert_eq!(cfg.sync.page_size, 10_000);
        assert!(!cfg.sync.allow_empty_purge);

        let options = cfg.reconcile.options().unwrap();
        assert_eq!(options.absent_policy, AbsentTimestampPolicy::AssumeInactive);
        assert_eq!(options.source_offset.local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert!(cfg.ocs.is_none());
        assert!(cfg.require_index().is_err());
        assert_eq!(cfg.reconcile.absent_timestamp_policy, AbsentTimestampPolicy::Unknown);
        assert_eq!(cfg.sync.batch_size, 500);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = parse_config("[sync]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_rejects_bad_offset() {
        assert!(parse_config("[reconcile]\nsource_utc_offset = \"7\"\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(parse_config("[reconcile]\nabsent_timestamp_policy = \"maybe\"\n").is_err());
    }

    #[test]
    fn test_rejects_ssl_and_starttls() {
        let toml = r#"
[directory]
host = "dc01"
bind_dn = "cn=x"
search_base = "dc=corp"
use_ssl = true
use_starttls = true
"#;
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/invsync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
