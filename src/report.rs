//! Directory report export parser.
//!
//! AD management consoles export computer reports as JSON of the form
//! `{"resultrows": [{"COLUMNS": [{"ATTRIB_ID": 3001, "VALUE": "PC01"}, ...]}]}`.
//! [`parse_computer_report`] turns such an export into [`AdRecord`]s so it can
//! stand in for a live directory in `invsync merge --ad-format report`.
//!
//! | `ATTRIB_ID` | Field |
//! |-------------|-------|
//! | 3001 | name |
//! | 3019 | last logon |
//! | 3021 | status (lower-cased) |
//! | 3012 | last modified |
//!
//! The module also loads the export files read by `invsync merge`.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use inventory_sync_core::models::{AdRecord, OcsRecord, Status};
use inventory_sync_core::reconcile::merge;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;

/// Layout of a directory export file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AdFormat {
    /// JSON array of `{computer_name, computer_status, last_logon_time, ad_last_modified_time}`.
    Records,
    /// Management console report (`resultrows` / `COLUMNS`).
    Report,
}

const ATTR_NAME: i64 = 3001;
const ATTR_LAST_MODIFIED: i64 = 3012;
const ATTR_LAST_LOGON: i64 = 3019;
const ATTR_STATUS: i64 = 3021;

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    resultrows: Vec<ReportRow>,
}

#[derive(Debug, Deserialize)]
struct ReportRow {
    #[serde(rename = "COLUMNS", default)]
    columns: Vec<ReportColumn>,
}

#[derive(Debug, Deserialize)]
struct ReportColumn {
    #[serde(rename = "ATTRIB_ID")]
    attrib_id: i64,
    #[serde(rename = "VALUE", default)]
    value: String,
}

pub fn parse_computer_report(bytes: &[u8]) -> Result<Vec<AdRecord>> {
    let report: Report =
        serde_json::from_slice(bytes).with_context(|| "Failed to parse directory report JSON")?;

    let mut records = Vec::with_capacity(report.resultrows.len());
    let mut skipped = 0usize;

    for row in report.resultrows {
        let mut name = None;
        let mut last_logon = None;
        let mut status = None;
        let mut last_modified = None;

        for col in row.columns {
            match col.attrib_id {
                ATTR_NAME => name = Some(col.value),
                ATTR_LAST_LOGON => last_logon = Some(col.value),
                ATTR_STATUS => status = Some(col.value),
                ATTR_LAST_MODIFIED => last_modified = Some(col.value),
                _ => {}
            }
        }

        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            skipped += 1;
            continue;
        };

        let status = match status.as_deref().map(|s| s.parse::<Status>()) {
            Some(Ok(s)) => s,
            Some(Err(_)) => {
                warn!(computer = %name, raw = ?status, "Unknown status in report, assuming enabled");
                Status::Enabled
            }
            None => Status::Enabled,
        };

        records.push(AdRecord {
            name,
            status,
            last_logon: last_logon.filter(|v| !v.is_empty()),
            last_modified: last_modified.filter(|v| !v.is_empty()),
        });
    }

    if skipped > 0 {
        warn!(skipped, "Report rows without a computer name skipped");
    }

    Ok(records)
}

/// Read an OCS export: a JSON array of records.
///
/// Entries that do not form a record are skipped with a warning.
pub fn load_ocs_export(path: &Path) -> Result<Vec<OcsRecord>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read OCS export: {}", path.display()))?;
    parse_export(&bytes, "OCS export", path)
}

pub fn load_ad_export(path: &Path, format: AdFormat) -> Result<Vec<AdRecord>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read directory export: {}", path.display()))?;
    match format {
        AdFormat::Records => parse_export(&bytes, "directory export", path),
        AdFormat::Report => parse_computer_report(&bytes),
    }
}

/// Parse a JSON array entry by entry. Only a file that is not an array fails.
fn parse_export<T: DeserializeOwned>(bytes: &[u8], what: &str, path: &Path) -> Result<Vec<T>> {
    let entries: Vec<Value> = serde_json::from_slice(bytes)
        .with_context(|| format!("Failed to parse {}: {}", what, path.display()))?;

    let mut records = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for (entry, value) in entries.into_iter().enumerate() {
        match serde_json::from_value(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(entry, error = %e, "Malformed {} entry skipped", what);
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, file = %path.display(), "Malformed {} entries skipped", what);
    }
    Ok(records)
}

/// `invsync merge`: reconcile two export files and print the documents.
pub fn run_merge(config: &Config, ocs_path: &Path, ad_path: &Path, format: AdFormat) -> Result<()> {
    let ocs = load_ocs_export(ocs_path)?;
    let ad = load_ad_export(ad_path, format)?;
    let options = config.reconcile.options()?;

    let outcome = merge(&ocs, &ad, Utc::now(), &options);
    info!(
        ocs = outcome.stats.ocs_records,
        ad = outcome.stats.ad_records,
        merged = outcome.records.len(),
        skipped = outcome.stats.skipped,
        duplicates = outcome.stats.duplicates,
        "Exports merged"
    );

    println!("{}", serde_json::to_string_pretty(&outcome.records)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "resultrows": [
            {"COLUMNS": [
                {"ATTRIB_ID": 3001, "VALUE": "PC01"},
                {"ATTRIB_ID": 3019, "VALUE": "2024-01-10 00:00:00"},
                {"ATTRIB_ID": 3021, "VALUE": "Enabled"},
                {"ATTRIB_ID": 3012, "VALUE": "2024-02-01 09:15:00"},
                {"ATTRIB_ID": 3099, "VALUE": "ignored"}
            ]},
            {"COLUMNS": [
                {"ATTRIB_ID": 3001, "VALUE": "PC02"},
                {"ATTRIB_ID": 3019, "VALUE": "-"},
                {"ATTRIB_ID": 3021, "VALUE": "DISABLED"}
            ]},
            {"COLUMNS": [
                {"ATTRIB_ID": 3019, "VALUE": "2024-01-10 00:00:00"}
            ]}
        ]
    }"#;

    #[test]
    fn test_parse_report() {
        let records = parse_computer_report(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].name, "PC01");
        assert_eq!(records[0].status, Status::Enabled);
        assert_eq!(records[0].last_logon.as_deref(), Some("2024-01-10 00:00:00"));
        assert_eq!(records[0].last_modified.as_deref(), Some("2024-02-01 09:15:00"));

        assert_eq!(records[1].name, "PC02");
        assert_eq!(records[1].status, Status::Disabled);
        assert_eq!(records[1].last_logon.as_deref(), Some("-"));
        assert!(records[1].last_modified.is_none());
    }

    #[test]
    fn test_empty_report() {
        assert!(parse_computer_report(b"{}").unwrap().is_empty());
    }

    #[test]
    fn test_load_exports() {
        let dir = tempfile::tempdir().unwrap();
        let ocs_path = dir.path().join("ocs.json");
        let ad_path = dir.path().join("ad.json");
        std::fs::write(
            &ocs_path,
            r#"[{"computer_name": "PC01", "ocs_status": "enabled", "ocs_last_come": "", "ocs_last_inventory": "2024-01-01 00:00:00"}]"#,
        )
        .unwrap();
        std::fs::write(&ad_path, SAMPLE).unwrap();

        let ocs = load_ocs_export(&ocs_path).unwrap();
        assert_eq!(ocs.len(), 1);
        let ad = load_ad_export(&ad_path, AdFormat::Report).unwrap();
        assert_eq!(ad.len(), 2);
        assert!(load_ad_export(&ad_path, AdFormat::Records).is_err());
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ocs_path = dir.path().join("ocs.json");
        std::fs::write(
            &ocs_path,
            r#"[
                {"computer_name": "PC01", "ocs_status": "Enabled"},
                {"computer_name": "PC02", "ocs_status": "retired"},
                {"ocs_status": "enabled"},
                "PC04",
                {"computer_name": "PC05", "ocs_status": "DISABLED", "ocs_last_come": "2024-01-05 08:00:00"}
            ]"#,
        )
        .unwrap();

        let ocs = load_ocs_export(&ocs_path).unwrap();
        let names: Vec<&str> = ocs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["PC01", "PC05"]);
        assert_eq!(ocs[0].status, Status::Enabled);
        assert_eq!(ocs[1].status, Status::Disabled);

        let ad_path = dir.path().join("ad.json");
        std::fs::write(
            &ad_path,
            r#"[{"computer_name": "LAPTOP-7", "computer_status": "Disabled"}, {"computer_name": 7}]"#,
        )
        .unwrap();
        let ad = load_ad_export(&ad_path, AdFormat::Records).unwrap();
        assert_eq!(ad.len(), 1);
        assert_eq!(ad[0].status, Status::Disabled);
    }

    #[test]
    fn test_export_must_be_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocs.json");
        std::fs::write(&path, r#"{"computer_name": "PC01"}"#).unwrap();
        let err = load_ocs_export(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse OCS export"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(parse_computer_report(b"not json").is_err());
    }
}
