//! Active Directory connector.
//!
//! Searches the configured base for computer objects over LDAP (paged, so
//! directories larger than the server's size limit come back complete) and
//! converts each entry into an [`AdRecord`].
//!
//! # Attribute mapping
//!
//! | Attribute | Record field |
//! |-----------|--------------|
//! | `name` (falls back to `cn`) | `name` |
//! | `userAccountControl` bit `0x2` | `status` (set → disabled) |
//! | `lastLogonTimestamp` / `lastLogon` | `last_logon`, newest of the two, RFC 3339 UTC |
//! | `whenChanged` | `last_modified`, RFC 3339 UTC |
//!
//! FILETIME values of `0` or `i64::MAX` mean "never" and map to `None`.
//! Entries with no usable name are skipped and counted.
//!
//! The bound session is cached and cloned per operation. After a
//! connectivity failure the driver calls [`DirectorySource::reconnect`],
//! which discards the cached session and binds a fresh one.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use inventory_sync_core::models::{AdRecord, Status};
use inventory_sync_core::timestamp::format_utc;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{secret_from_env, DirectoryConfig};
use crate::error::SourceError;
use crate::traits::DirectorySource;

const ATTRS: &[&str] = &[
    "name",
    "cn",
    "userAccountControl",
    "lastLogonTimestamp",
    "lastLogon",
    "whenChanged",
];

const UAC_ACCOUNTDISABLE: u32 = 0x2;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;
/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;
const LDAP_INVALID_CREDENTIALS: u32 = 49;

pub struct LdapDirectory {
    config: DirectoryConfig,
    password: String,
    connection: RwLock<Option<Ldap>>,
}

impl LdapDirectory {
    /// Build the connector. No network I/O happens until the first search
    /// or an explicit [`connect`](Self::connect).
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let password = secret_from_env(&config.password_env)?;
        Ok(Self {
            config,
            password,
            connection: RwLock::new(None),
        })
    }

    pub fn url(&self) -> String {
        let scheme = if self.config.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.config.host, self.config.port)
    }

    /// Bind now and cache the session.
    pub async fn connect(&self) -> Result<(), SourceError> {
        let ldap = self.create_connection().await?;
        *self.connection.write().await = Some(ldap);
        Ok(())
    }

    async fn session(&self) -> Result<Ldap, SourceError> {
        {
            let guard = self.connection.read().await;
            if let Some(ref ldap) = *guard {
                return Ok(ldap.clone());
            }
        }

        let ldap = self.create_connection().await?;
        *self.connection.write().await = Some(ldap.clone());
        Ok(ldap)
    }

    async fn create_connection(&self) -> Result<Ldap, SourceError> {
        let url = self.url();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        debug!(url = %url, "Connecting to directory");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(timeout)
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| SourceError::Connectivity(format!("{}: {}", url, e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let result = ldap
            .with_timeout(timeout)
            .simple_bind(&self.config.bind_dn, &self.password)
            .await
            .map_err(|e| SourceError::Connectivity(format!("bind to {}: {}", url, e)))?;

        if result.rc == LDAP_INVALID_CREDENTIALS {
            return Err(SourceError::Config(format!(
                "invalid credentials for {}",
                self.config.bind_dn
            )));
        }
        if result.rc != 0 {
            return Err(SourceError::Query(format!(
                "bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "Directory connection established");
        Ok(ldap)
    }
}

#[async_trait]
impl DirectorySource for LdapDirectory {
    fn name(&self) -> &str {
        "active-directory"
    }

    async fn list_computers(&self) -> Result<Vec<AdRecord>, SourceError> {
        let mut ldap = self.session().await?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(self.config.page_size)),
        ];
        let mut stream = ldap
            .with_timeout(timeout)
            .streaming_search_with(
                adapters,
                &self.config.search_base,
                Scope::Subtree,
                &self.config.filter,
                ATTRS.to_vec(),
            )
            .await?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        while let Some(entry) = stream.next().await? {
            match entry_to_record(&SearchEntry::construct(entry)) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
        stream.finish().await.success()?;

        if skipped > 0 {
            warn!(skipped, "Directory entries without a name skipped");
        }
        debug!(count = records.len(), "Directory computers fetched");
        Ok(records)
    }

    async fn reconnect(&self) -> Result<(), SourceError> {
        let stale = self.connection.write().await.take();
        if let Some(mut ldap) = stale {
            if let Err(e) = ldap.unbind().await {
                debug!(error = %e, "Unbind of stale directory session failed");
            }
        }
        self.connect().await
    }
}

fn first_attr<'a>(entry: &'a SearchEntry, name: &str) -> Option<&'a str> {
    entry
        .attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Convert one search entry. Returns `None` when the entry has no name.
pub fn entry_to_record(entry: &SearchEntry) -> Option<AdRecord> {
    let name = first_attr(entry, "name").or_else(|| first_attr(entry, "cn"))?;

    let status = first_attr(entry, "userAccountControl")
        .map(uac_status)
        .unwrap_or(Status::Enabled);

    let last_logon = [
        first_attr(entry, "lastLogonTimestamp"),
        first_attr(entry, "lastLogon"),
    ]
    .into_iter()
    .flatten()
    .filter_map(filetime_to_utc)
    .max()
    .map(format_utc);

    let last_modified = first_attr(entry, "whenChanged").and_then(generalized_time_to_rfc3339);

    Some(AdRecord {
        name: name.to_string(),
        status,
        last_logon,
        last_modified,
    })
}

/// `userAccountControl` → status. Unparsable values count as enabled.
pub fn uac_status(raw: &str) -> Status {
    match raw.trim().parse::<u32>() {
        Ok(flags) if flags & UAC_ACCOUNTDISABLE != 0 => Status::Disabled,
        _ => Status::Enabled,
    }
}

/// Windows FILETIME (100 ns ticks since 1601-01-01) → UTC instant.
pub fn filetime_to_utc(raw: &str) -> Option<DateTime<Utc>> {
    let ticks: i64 = raw.trim().parse().ok()?;
    if ticks <= 0 || ticks == i64::MAX {
        return None;
    }
    let secs = ticks / FILETIME_TICKS_PER_SEC - FILETIME_EPOCH_OFFSET_SECS;
    DateTime::from_timestamp(secs, 0)
}

/// LDAP generalized time (`20240620153045.0Z`) → `2024-06-20T15:30:45Z`.
pub fn generalized_time_to_rfc3339(raw: &str) -> Option<String> {
    let digits = raw.trim().get(..14)?;
    let naive = NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S").ok()?;
    Some(format_utc(naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(attrs: &[(&str, &str)]) -> SearchEntry {
        SearchEntry {
            dn: "CN=PC01,OU=Computers,DC=corp,DC=local".to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
                .collect::<HashMap<_, _>>(),
            bin_attrs: HashMap::new(),
        }
    }

    #[test]
    fn test_filetime_conversion() {
        // 2024-01-10T00:00:00Z
        let ticks = (1_704_844_800 + FILETIME_EPOCH_OFFSET_SECS) * FILETIME_TICKS_PER_SEC;
        let t = filetime_to_utc(&ticks.to_string()).unwrap();
        assert_eq!(format_utc(t), "2024-01-10T00:00:00Z");
    }

    #[test]
    fn test_filetime_never() {
        assert!(filetime_to_utc("0").is_none());
        assert!(filetime_to_utc("9223372036854775807").is_none());
        assert!(filetime_to_utc("garbage").is_none());
    }

    #[test]
    fn test_generalized_time() {
        assert_eq!(
            generalized_time_to_rfc3339("20240620153045.0Z").as_deref(),
            Some("2024-06-20T15:30:45Z")
        );
        assert!(generalized_time_to_rfc3339("2024").is_none());
    }

    #[test]
    fn test_uac_disabled_bit() {
        assert_eq!(uac_status("4096"), Status::Enabled);
        assert_eq!(uac_status("4098"), Status::Disabled);
        assert_eq!(uac_status("junk"), Status::Enabled);
    }

    #[test]
    fn test_entry_to_record() {
        let ticks = ((1_704_844_800 + FILETIME_EPOCH_OFFSET_SECS) * FILETIME_TICKS_PER_SEC).to_string();
        let rec = entry_to_record(&entry(&[
            ("name", "PC01"),
            ("userAccountControl", "4098"),
            ("lastLogonTimestamp", ticks.as_str()),
            ("lastLogon", "0"),
            ("whenChanged", "20240620153045.0Z"),
        ]))
        .unwrap();
        assert_eq!(rec.name, "PC01");
        assert_eq!(rec.status, Status::Disabled);
        assert_eq!(rec.last_logon.as_deref(), Some("2024-01-10T00:00:00Z"));
        assert_eq!(rec.last_modified.as_deref(), Some("2024-06-20T15:30:45Z"));
    }

    #[test]
    fn test_entry_prefers_newest_logon() {
        let older = (1_704_844_800 + FILETIME_EPOCH_OFFSET_SECS) * FILETIME_TICKS_PER_SEC;
        let newer = (older + 86_400 * FILETIME_TICKS_PER_SEC).to_string();
        let older = older.to_string();
        let rec = entry_to_record(&entry(&[
            ("cn", "PC02"),
            ("lastLogonTimestamp", older.as_str()),
            ("lastLogon", newer.as_str()),
        ]))
        .unwrap();
        assert_eq!(rec.name, "PC02");
        assert_eq!(rec.status, Status::Enabled);
        assert_eq!(rec.last_logon.as_deref(), Some("2024-01-11T00:00:00Z"));
        assert!(rec.last_modified.is_none());
    }

    #[test]
    fn test_entry_never_logged_on() {
        let rec = entry_to_record(&entry(&[("name", "PC03"), ("lastLogonTimestamp", "0")])).unwrap();
        assert!(rec.last_logon.is_none());
    }

    #[test]
    fn test_entry_without_name_skipped() {
        assert!(entry_to_record(&entry(&[("userAccountControl", "4096")])).is_none());
        assert!(entry_to_record(&entry(&[("name", "  ")])).is_none());
    }
}
