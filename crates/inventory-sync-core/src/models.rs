//! Data models flowing through the reconciliation pipeline.
//!
//! [`OcsRecord`] and [`AdRecord`] are what the source adapters produce;
//! [`MergedRecord`] is the document written to the search index. Serialized
//! field names match the index document layout consumed by dashboards, so
//! renaming a field here is a breaking change for downstream queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enabled/disabled state reported by a source.
///
/// Deserializes case-insensitively through [`FromStr`]; serializes lower-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Status {
    Enabled,
    Disabled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Enabled => "enabled",
            Status::Disabled => "disabled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Status {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" => Ok(Status::Enabled),
            "disabled" => Ok(Status::Disabled),
            other => anyhow::bail!("unknown status: '{}'", other),
        }
    }
}

/// One asset row from the OCS Inventory database.
///
/// Timestamps are kept as the strings the adapter produced; the reconciler
/// parses them without rewriting the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcsRecord {
    #[serde(rename = "computer_name")]
    pub name: String,
    #[serde(rename = "ocs_status")]
    pub status: Status,
    #[serde(rename = "ocs_last_come", default)]
    pub last_come: Option<String>,
    #[serde(rename = "ocs_last_inventory", default)]
    pub last_inventory: Option<String>,
}

/// One computer object from Active Directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRecord {
    #[serde(rename = "computer_name")]
    pub name: String,
    #[serde(rename = "computer_status")]
    pub status: Status,
    #[serde(rename = "last_logon_time", default)]
    pub last_logon: Option<String>,
    #[serde(rename = "ad_last_modified_time", default)]
    pub last_modified: Option<String>,
}

/// Unified view of one computer for a single reconciliation cycle.
///
/// Fields belonging to a source the computer is missing from stay `None`
/// and are omitted from the serialized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub computer_name: String,
    pub exists_in_ocs: bool,
    pub exists_in_ad: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_status: Option<Status>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_last_inventory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_last_come: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_last_logon_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_last_modified_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_not_login_more_than_30d: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_not_login_more_than_45d: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_last_inventory_more_than_30d: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_last_come_more_than_30d: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_last_come_more_than_45d: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocs_inactive_duration_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_inactive_duration_days: Option<i64>,

    /// Sync timestamp, RFC 3339 in UTC.
    #[serde(rename = "@timestamp")]
    pub sync_timestamp: String,
}

impl MergedRecord {
    /// A record seen only in OCS so far; AD fields are empty.
    pub(crate) fn ocs_only(name: &str, sync_timestamp: String) -> Self {
        Self::empty(name, true, false, sync_timestamp)
    }

    /// A record seen only in AD.
    pub(crate) fn ad_only(name: &str, sync_timestamp: String) -> Self {
        Self::empty(name, false, true, sync_timestamp)
    }

    fn empty(name: &str, in_ocs: bool, in_ad: bool, sync_timestamp: String) -> Self {
        Self {
            computer_name: name.to_string(),
            exists_in_ocs: in_ocs,
            exists_in_ad: in_ad,
            ocs_status: None,
            ad_status: None,
            ocs_last_inventory: None,
            ocs_last_come: None,
            ad_last_logon_time: None,
            ad_last_modified_time: None,
            ad_not_login_more_than_30d: None,
            ad_not_login_more_than_45d: None,
            ocs_last_inventory_more_than_30d: None,
            ocs_last_come_more_than_30d: None,
            ocs_last_come_more_than_45d: None,
            ocs_inactive_duration_days: None,
            ad_inactive_duration_days: None,
            sync_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("Enabled".parse::<Status>().unwrap(), Status::Enabled);
        assert_eq!(" disabled ".parse::<Status>().unwrap(), Status::Disabled);
        assert!("unknown".parse::<Status>().is_err());
    }

    #[test]
    fn test_ocs_record_from_export_json() {
        let json = r#"{
            "computer_name": "PC01",
            "ocs_status": "enabled",
            "ocs_last_come": "2024-01-05 08:00:00",
            "ocs_last_inventory": "2024-01-01 00:00:00"
        }"#;
        let rec: OcsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.name, "PC01");
        assert_eq!(rec.status, Status::Enabled);
        assert_eq!(rec.last_inventory.as_deref(), Some("2024-01-01 00:00:00"));
    }

    #[test]
    fn test_status_deserializes_any_case() {
        let rec: OcsRecord =
            serde_json::from_str(r#"{"computer_name": "PC01", "ocs_status": "Enabled"}"#).unwrap();
        assert_eq!(rec.status, Status::Enabled);
        let rec: AdRecord =
            serde_json::from_str(r#"{"computer_name": "PC02", "computer_status": "DISABLED"}"#)
                .unwrap();
        assert_eq!(rec.status, Status::Disabled);
        assert!(serde_json::from_str::<Status>(r#""retired""#).is_err());
        assert_eq!(serde_json::to_string(&Status::Enabled).unwrap(), r#""enabled""#);
    }

    #[test]
    fn test_ad_record_missing_timestamps_default_to_none() {
        let json = r#"{"computer_name": "PC02", "computer_status": "disabled"}"#;
        let rec: AdRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.status, Status::Disabled);
        assert!(rec.last_logon.is_none());
        assert!(rec.last_modified.is_none());
    }

    #[test]
    fn test_merged_record_omits_absent_fields() {
        let rec = MergedRecord::ocs_only("PC01", "2024-01-01T00:00:00Z".to_string());
        let value = serde_json::to_value(&rec).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["computer_name"], "PC01");
        assert_eq!(obj["exists_in_ocs"], true);
        assert_eq!(obj["exists_in_ad"], false);
        assert_eq!(obj["@timestamp"], "2024-01-01T00:00:00Z");
        assert!(!obj.contains_key("ad_status"));
        assert!(!obj.contains_key("ad_not_login_more_than_30d"));
    }
}
