//! OCS + Active Directory reconciliation.
//!
//! [`merge`] folds the two source sequences into one [`MergedRecord`] per
//! [`IdentityKey`]. OCS records seed the table; AD records either enrich a
//! seeded record or start a new AD-only one. Inactivity flags are derived per
//! source, and only for sources the computer actually appears in.
//!
//! # Derived fields
//!
//! | Field | Source timestamp |
//! |-------|------------------|
//! | `ocs_last_inventory_more_than_30d` | OCS last inventory |
//! | `ocs_last_come_more_than_30d` / `_45d`, `ocs_inactive_duration_days` | OCS last contact |
//! | `ad_not_login_more_than_30d` / `_45d`, `ad_inactive_duration_days` | AD last logon |
//!
//! `@timestamp` takes the first usable value of OCS last inventory, then AD
//! last logon, then `now`.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::identity::{normalize, IdentityKey};
use crate::models::{AdRecord, MergedRecord, OcsRecord};
use crate::timestamp::{format_utc, interpret, utc_offset, FieldTime};

const DAYS_30: i64 = 30;
const DAYS_45: i64 = 45;

/// How inactivity flags are derived when a source has no usable timestamp
/// (missing field or a `"0"`/`"-"` sentinel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentTimestampPolicy {
    /// Leave the flags absent so consumers can tell "unknown" from "fresh".
    Unknown,
    /// Report the computer as inactive (`true` flags, no duration).
    AssumeInactive,
}

pub const DEFAULT_ABSENT_TIMESTAMP_POLICY: AbsentTimestampPolicy = AbsentTimestampPolicy::Unknown;

impl Default for AbsentTimestampPolicy {
    fn default() -> Self {
        DEFAULT_ABSENT_TIMESTAMP_POLICY
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub absent_policy: AbsentTimestampPolicy,
    /// Offset applied to zone-less source timestamps.
    pub source_offset: FixedOffset,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            absent_policy: DEFAULT_ABSENT_TIMESTAMP_POLICY,
            source_offset: utc_offset(),
        }
    }
}

/// Counters describing one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub ocs_records: usize,
    pub ad_records: usize,
    pub matched: usize,
    pub ocs_only: usize,
    pub ad_only: usize,
    /// Records dropped for lacking a name.
    pub skipped: usize,
    /// Records whose key was already seen in the same source.
    pub duplicates: usize,
    pub unparsable_timestamps: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub records: Vec<MergedRecord>,
    pub stats: MergeStats,
}

/// Inactivity view of one source timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Activity {
    more_than_30d: Option<bool>,
    more_than_45d: Option<bool>,
    inactive_days: Option<i64>,
}

fn activity(field: FieldTime, now: DateTime<Utc>, policy: AbsentTimestampPolicy) -> Activity {
    match field {
        FieldTime::At(t) => {
            let elapsed = now - t;
            Activity {
                more_than_30d: Some(elapsed > Duration::days(DAYS_30)),
                more_than_45d: Some(elapsed > Duration::days(DAYS_45)),
                inactive_days: Some(elapsed.num_days().max(0)),
            }
        }
        FieldTime::Absent => match policy {
            AbsentTimestampPolicy::Unknown => Activity::default(),
            AbsentTimestampPolicy::AssumeInactive => Activity {
                more_than_30d: Some(true),
                more_than_45d: Some(true),
                inactive_days: None,
            },
        },
        FieldTime::Unparsable => Activity::default(),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

/// Merge both sources as of `now`.
///
/// Never fails: nameless records are dropped and counted, bad timestamps
/// degrade to absent flags and are counted.
pub fn merge(
    ocs: &[OcsRecord],
    ad: &[AdRecord],
    now: DateTime<Utc>,
    options: &ReconcileOptions,
) -> MergeOutcome {
    let offset = options.source_offset;
    let policy = options.absent_policy;

    let mut stats = MergeStats {
        ocs_records: ocs.len(),
        ad_records: ad.len(),
        ..Default::default()
    };
    let mut records: Vec<MergedRecord> = Vec::with_capacity(ocs.len() + ad.len());
    let mut slots: HashMap<IdentityKey, usize> = HashMap::with_capacity(ocs.len());

    for rec in ocs {
        if rec.name.trim().is_empty() {
            stats.skipped += 1;
            continue;
        }
        let key = normalize(&rec.name);
        if slots.contains_key(&key) {
            stats.duplicates += 1;
            continue;
        }

        let last_inventory = interpret(rec.last_inventory.as_deref(), offset);
        let last_come = interpret(rec.last_come.as_deref(), offset);
        stats.unparsable_timestamps += [last_inventory, last_come]
            .iter()
            .filter(|f| **f == FieldTime::Unparsable)
            .count();

        let inventory_activity = activity(last_inventory, now, policy);
        let come_activity = activity(last_come, now, policy);

        let mut merged = MergedRecord::ocs_only(&rec.name, String::new());
        merged.ocs_status = Some(rec.status);
        merged.ocs_last_inventory = non_empty(&rec.last_inventory);
        merged.ocs_last_come = non_empty(&rec.last_come);
        merged.ocs_last_inventory_more_than_30d = inventory_activity.more_than_30d;
        merged.ocs_last_come_more_than_30d = come_activity.more_than_30d;
        merged.ocs_last_come_more_than_45d = come_activity.more_than_45d;
        merged.ocs_inactive_duration_days = come_activity.inactive_days;

        slots.insert(key, records.len());
        records.push(merged);
    }

    let mut seen_in_ad: HashSet<IdentityKey> = HashSet::with_capacity(ad.len());

    for rec in ad {
        if rec.name.trim().is_empty() {
            stats.skipped += 1;
            continue;
        }
        let key = normalize(&rec.name);
        if !seen_in_ad.insert(key.clone()) {
            stats.duplicates += 1;
            continue;
        }

        let last_logon = interpret(rec.last_logon.as_deref(), offset);
        if last_logon == FieldTime::Unparsable {
            stats.unparsable_timestamps += 1;
        }
        let logon_activity = activity(last_logon, now, policy);

        let slot = match slots.get(&key) {
            Some(&i) => {
                stats.matched += 1;
                i
            }
            None => {
                slots.insert(key, records.len());
                records.push(MergedRecord::ad_only(&rec.name, String::new()));
                records.len() - 1
            }
        };

        if let Some(merged) = records.get_mut(slot) {
            merged.exists_in_ad = true;
            merged.ad_status = Some(rec.status);
            merged.ad_last_logon_time = non_empty(&rec.last_logon);
            merged.ad_last_modified_time = non_empty(&rec.last_modified);
            merged.ad_not_login_more_than_30d = logon_activity.more_than_30d;
            merged.ad_not_login_more_than_45d = logon_activity.more_than_45d;
            merged.ad_inactive_duration_days = logon_activity.inactive_days;
        }
    }

    for merged in &mut records {
        merged.sync_timestamp = sync_timestamp(merged, now, offset);
        match (merged.exists_in_ocs, merged.exists_in_ad) {
            (true, false) => stats.ocs_only += 1,
            (false, true) => stats.ad_only += 1,
            _ => {}
        }
    }

    MergeOutcome { records, stats }
}

/// Pick the document timestamp: OCS last inventory, then AD last logon, then `now`.
fn sync_timestamp(record: &MergedRecord, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let chosen = interpret(record.ocs_last_inventory.as_deref(), offset)
        .instant()
        .or_else(|| interpret(record.ad_last_logon_time.as_deref(), offset).instant())
        .unwrap_or(now);
    format_utc(chosen)
}
