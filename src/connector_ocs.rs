//! OCS Inventory connector.
//!
//! Reads the `hardware` table of an OCS Inventory NG database over a pooled
//! MySQL connection and produces one [`OcsRecord`] per row.
//!
//! # Column mapping
//!
//! | Column | Record field |
//! |--------|--------------|
//! | `NAME` | `name` |
//! | `ARCHIVE` | `status` (`NULL` → enabled, anything else → disabled) |
//! | `LASTDATE` | `last_inventory` |
//! | `LASTCOME` | `last_come` |
//!
//! Timestamps are rendered by MySQL as `YYYY-MM-DD HH:MM:SS` in the server's
//! local time; `reconcile.source_utc_offset` tells the reconciler which
//! offset that is. MySQL zero dates are treated as missing.

use async_trait::async_trait;
use inventory_sync_core::models::{OcsRecord, Status};
use sqlx::mysql::MySqlPool;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::traits::AssetSource;

const SELECT_HARDWARE: &str = "SELECT NAME, CAST(ARCHIVE AS SIGNED), \
     DATE_FORMAT(LASTDATE, '%Y-%m-%d %H:%i:%s'), \
     DATE_FORMAT(LASTCOME, '%Y-%m-%d %H:%i:%s') \
     FROM hardware";

/// Raw `hardware` row: name, archive flag, last inventory, last contact.
pub type HardwareRow = (Option<String>, Option<i64>, Option<String>, Option<String>);

pub struct OcsConnector {
    pool: MySqlPool,
}

impl OcsConnector {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetSource for OcsConnector {
    fn name(&self) -> &str {
        "ocs"
    }

    async fn list_assets(&self, limit: usize) -> Result<Vec<OcsRecord>, SourceError> {
        let limited = format!("{} LIMIT ?", SELECT_HARDWARE);
        let rows: Vec<HardwareRow> = if limit > 0 {
            sqlx::query_as(&limited)
                .bind(limit as u64)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as(SELECT_HARDWARE)
                .fetch_all(&self.pool)
                .await?
        };

        let total = rows.len();
        let records: Vec<OcsRecord> = rows.into_iter().filter_map(row_to_record).collect();
        if records.len() < total {
            warn!(
                skipped = total - records.len(),
                "OCS hardware rows without NAME skipped"
            );
        }
        debug!(count = records.len(), limit, "OCS assets fetched");
        Ok(records)
    }
}

/// Map one `hardware` row. Rows without a name yield `None`.
pub fn row_to_record(row: HardwareRow) -> Option<OcsRecord> {
    let (name, archive, last_date, last_come) = row;
    let name = name.filter(|n| !n.trim().is_empty())?;
    let status = if archive.is_some() {
        Status::Disabled
    } else {
        Status::Enabled
    };
    Some(OcsRecord {
        name,
        status,
        last_come: clean_datetime(last_come),
        last_inventory: clean_datetime(last_date),
    })
}

fn clean_datetime(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty() && !v.starts_with("0000-00-00"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_row() {
        let rec = row_to_record((
            Some("PC01".to_string()),
            None,
            Some("2024-01-01 00:00:00".to_string()),
            Some("2024-01-05 08:00:00".to_string()),
        ))
        .unwrap();
        assert_eq!(rec.name, "PC01");
        assert_eq!(rec.status, Status::Enabled);
        assert_eq!(rec.last_inventory.as_deref(), Some("2024-01-01 00:00:00"));
        assert_eq!(rec.last_come.as_deref(), Some("2024-01-05 08:00:00"));
    }

    #[test]
    fn test_archived_row_is_disabled() {
        let rec = row_to_record((Some("PC02".to_string()), Some(0), None, None)).unwrap();
        assert_eq!(rec.status, Status::Disabled);
        assert!(rec.last_come.is_none());
        assert!(rec.last_inventory.is_none());
    }

    #[test]
    fn test_zero_date_is_missing() {
        let rec = row_to_record((
            Some("PC03".to_string()),
            None,
            Some("0000-00-00 00:00:00".to_string()),
            None,
        ))
        .unwrap();
        assert!(rec.last_inventory.is_none());
    }

    #[test]
    fn test_nameless_row_skipped() {
        assert!(row_to_record((None, None, None, None)).is_none());
        assert!(row_to_record((Some("  ".to_string()), None, None, None)).is_none());
    }
}
