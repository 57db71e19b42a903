//! Source health listing for `invsync sources`.
//!
//! Probes each configured backend once and reports whether it answered.
//! Unconfigured backends are listed as such rather than treated as failures.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::connector_ad::LdapDirectory;
use crate::db;
use crate::sink_elastic::ElasticsearchSink;

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub configured: bool,
    pub healthy: bool,
    pub detail: String,
}

impl SourceStatus {
    fn not_configured(name: &str) -> Self {
        Self {
            name: name.to_string(),
            configured: false,
            healthy: false,
            detail: "NOT CONFIGURED".to_string(),
        }
    }

    fn from_probe(name: &str, probe: Result<String>) -> Self {
        match probe {
            Ok(detail) => Self {
                name: name.to_string(),
                configured: true,
                healthy: true,
                detail,
            },
            Err(e) => Self {
                name: name.to_string(),
                configured: true,
                healthy: false,
                detail: format!("{:#}", e),
            },
        }
    }
}

pub async fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let ocs = match &config.ocs {
        Some(cfg) => SourceStatus::from_probe("ocs", probe_ocs(cfg).await),
        None => SourceStatus::not_configured("ocs"),
    };
    let directory = match &config.directory {
        Some(cfg) => SourceStatus::from_probe("directory", probe_directory(cfg).await),
        None => SourceStatus::not_configured("directory"),
    };
    let index = match &config.index {
        Some(cfg) => SourceStatus::from_probe("index", probe_index(cfg).await),
        None => SourceStatus::not_configured("index"),
    };
    vec![ocs, directory, index]
}

async fn probe_ocs(cfg: &crate::config::OcsConfig) -> Result<String> {
    let pool = db::connect(cfg).await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hardware")
        .fetch_one(&pool)
        .await?;
    pool.close().await;
    Ok(format!("{} hardware rows", count))
}

async fn probe_directory(cfg: &crate::config::DirectoryConfig) -> Result<String> {
    let directory = LdapDirectory::new(cfg.clone())?;
    directory.connect().await?;
    Ok(format!("bound to {}", directory.url()))
}

async fn probe_index(cfg: &crate::config::IndexConfig) -> Result<String> {
    let sink = ElasticsearchSink::new(cfg)?;
    sink.ping().await
}

pub async fn list_sources(config: &Config) -> Result<()> {
    let sources = get_sources(config).await;

    println!("{:<12} {:<10} DETAIL", "SOURCE", "HEALTHY");
    for s in &sources {
        println!("{:<12} {:<10} {}", s.name, s.healthy, s.detail);
    }

    Ok(())
}
