//! Sync engine.
//!
//! One cycle pulls both sources, reconciles them, and drives the index to
//! the merged set:
//!
//! ```text
//! pull OCS ─┐                      ┌─▶ delete orphans (sequential)
//!           ├─▶ merge ─▶ enumerate ┤
//! pull AD ──┘                      └─▶ upsert batches (JoinSet + Semaphore)
//! ```
//!
//! Failure handling per cycle:
//!
//! - either source fails → the whole cycle is skipped, nothing is written
//! - directory connectivity error → one reconnect, one retry
//! - enumeration fails → deletions skipped, upserts still run
//! - both sources empty while the index is not → deletions skipped unless
//!   `sync.allow_empty_purge` is set
//! - a failed upsert or delete is counted and logged, never fatal
//!
//! [`run_service`] repeats cycles on a fixed interval until Ctrl-C.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use inventory_sync_core::identity::{normalize, IdentityKey};
use inventory_sync_core::models::{AdRecord, MergedRecord, OcsRecord};
use inventory_sync_core::reconcile::{merge, MergeStats, ReconcileOptions};
use inventory_sync_core::sink::{collect_keys, IndexSink};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SyncConfig};
use crate::connector_ad::LdapDirectory;
use crate::connector_ocs::OcsConnector;
use crate::db;
use crate::error::SourceError;
use crate::sink_elastic::ElasticsearchSink;
use crate::traits::{AssetSource, DirectorySource};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub page_size: usize,
    pub allow_empty_purge: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            max_concurrent_batches: cfg.max_concurrent_batches.max(1),
            page_size: cfg.page_size.max(1),
            allow_empty_purge: cfg.allow_empty_purge,
        }
    }
}

/// Everything a cycle needs besides the connections.
#[derive(Debug, Clone, Default)]
pub struct CycleSettings {
    /// OCS row limit, 0 for none.
    pub limit: usize,
    pub reconcile: ReconcileOptions,
    pub sync: SyncOptions,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            limit: config.ocs.as_ref().map(|o| o.limit).unwrap_or(0),
            reconcile: config.reconcile.options()?,
            sync: SyncOptions::from(&config.sync),
        })
    }
}

/// Index-side outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub deleted: usize,
    pub delete_failed: usize,
    pub upserted: usize,
    pub failed: usize,
    /// True when the deletion phase did not run.
    pub deletion_skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub merge: MergeStats,
    pub merged: usize,
    pub report: CycleReport,
}

/// What a cycle would do, computed without writing.
#[derive(Debug, Clone, Serialize)]
pub struct CyclePlan {
    pub merge: MergeStats,
    pub to_upsert: usize,
    pub to_delete: Vec<String>,
    pub deletion_skipped: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchTally {
    upserted: usize,
    failed: usize,
}

/// Index ids whose normalized key is absent from `merged`.
///
/// Ids are compared by [`IdentityKey`], so `"pc01 "` in the index survives a
/// merged `"PC01"`; both documents stay.
pub fn plan_orphans(merged: &[MergedRecord], current_keys: &[String]) -> Vec<String> {
    let live: HashSet<IdentityKey> = merged
        .iter()
        .map(|r| normalize(&r.computer_name))
        .collect();
    current_keys
        .iter()
        .filter(|id| !live.contains(&normalize(id)))
        .cloned()
        .collect()
}

fn empty_purge_blocked(merged: &[MergedRecord], current_keys: &[String], opts: &SyncOptions) -> bool {
    merged.is_empty() && !current_keys.is_empty() && !opts.allow_empty_purge
}

async fn delete_orphans(
    merged: &[MergedRecord],
    current_keys: &[String],
    sink: &dyn IndexSink,
    opts: &SyncOptions,
    report: &mut CycleReport,
) {
    if empty_purge_blocked(merged, current_keys, opts) {
        warn!(
            indexed = current_keys.len(),
            "Both sources returned nothing; refusing to empty the index"
        );
        report.deletion_skipped = true;
        return;
    }

    for id in plan_orphans(merged, current_keys) {
        match sink.delete(&id).await {
            Ok(()) => {
                debug!(computer = %id, "Deleted orphan document");
                report.deleted += 1;
            }
            Err(e) => {
                warn!(computer = %id, error = %format!("{:#}", e), "Delete failed");
                report.delete_failed += 1;
            }
        }
    }
}

fn into_batches(records: Vec<MergedRecord>, batch_size: usize) -> Vec<Vec<MergedRecord>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for record in records {
        current.push(record);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Upsert every record in bounded-concurrency batches.
///
/// Returns `(upserted, failed)`. Records of a batch whose worker died
/// without reporting are counted as failed.
pub async fn upsert_all(
    merged: Vec<MergedRecord>,
    sink: Arc<dyn IndexSink>,
    opts: &SyncOptions,
) -> (usize, usize) {
    let total = merged.len();
    let semaphore = Arc::new(Semaphore::new(opts.max_concurrent_batches.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<BatchTally>();
    let mut workers = JoinSet::new();

    for (index, batch) in into_batches(merged, opts.batch_size).into_iter().enumerate() {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let sink = Arc::clone(&sink);
        let tx = tx.clone();

        workers.spawn(async move {
            let _permit = permit;
            let mut tally = BatchTally::default();
            for record in &batch {
                match sink.upsert(&record.computer_name, record).await {
                    Ok(()) => tally.upserted += 1,
                    Err(e) => {
                        tally.failed += 1;
                        warn!(
                            batch = index,
                            computer = %record.computer_name,
                            error = %format!("{:#}", e),
                            "Upsert failed"
                        );
                    }
                }
            }
            if tx.send(tally).is_err() {
                debug!(batch = index, "Tally receiver gone");
            }
        });
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Upsert worker aborted");
        }
    }

    let mut upserted = 0;
    let mut failed = 0;
    while let Some(tally) = rx.recv().await {
        upserted += tally.upserted;
        failed += tally.failed;
    }

    let unreported = total.saturating_sub(upserted + failed);
    (upserted, failed + unreported)
}

/// Drive the sink from `current_keys` to `merged`: delete orphans, then upsert.
pub async fn reconcile_sink(
    merged: Vec<MergedRecord>,
    current_keys: &[String],
    sink: Arc<dyn IndexSink>,
    opts: &SyncOptions,
) -> CycleReport {
    let mut report = CycleReport::default();
    delete_orphans(&merged, current_keys, sink.as_ref(), opts, &mut report).await;
    let (upserted, failed) = upsert_all(merged, sink, opts).await;
    report.upserted = upserted;
    report.failed = failed;
    report
}

/// Enumerate the sink and reconcile it with `merged`.
///
/// If enumeration fails the deletion phase is skipped; upserts still run.
pub async fn run_cycle(
    merged: Vec<MergedRecord>,
    sink: Arc<dyn IndexSink>,
    opts: &SyncOptions,
) -> CycleReport {
    match collect_keys(sink.as_ref(), opts.page_size).await {
        Ok(current_keys) => reconcile_sink(merged, &current_keys, sink, opts).await,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Index enumeration failed; skipping deletions");
            let (upserted, failed) = upsert_all(merged, sink, opts).await;
            CycleReport {
                upserted,
                failed,
                deletion_skipped: true,
                ..Default::default()
            }
        }
    }
}

async fn list_computers_with_retry(
    directory: &dyn DirectorySource,
) -> Result<Vec<AdRecord>, SourceError> {
    match directory.list_computers().await {
        Err(e) if e.is_connectivity() => {
            warn!(source = directory.name(), error = %e, "Directory connection lost; reconnecting");
            directory.reconnect().await?;
            directory.list_computers().await
        }
        other => other,
    }
}

/// Fetch both sources concurrently. Any failure fails the pull.
pub async fn pull_sources(
    asset: &dyn AssetSource,
    directory: &dyn DirectorySource,
    limit: usize,
) -> Result<(Vec<OcsRecord>, Vec<AdRecord>)> {
    let (ocs, ad) = tokio::join!(
        asset.list_assets(limit),
        list_computers_with_retry(directory)
    );
    let ocs = ocs.with_context(|| format!("Failed to list assets from {}", asset.name()))?;
    let ad = ad.with_context(|| format!("Failed to list computers from {}", directory.name()))?;
    Ok((ocs, ad))
}

/// Run one full cycle as of `now`.
///
/// An `Err` means the cycle was skipped before anything was written.
pub async fn sync_once(
    asset: &dyn AssetSource,
    directory: &dyn DirectorySource,
    sink: Arc<dyn IndexSink>,
    settings: &CycleSettings,
    now: DateTime<Utc>,
) -> Result<CycleSummary> {
    let (ocs, ad) = pull_sources(asset, directory, settings.limit).await?;
    let outcome = merge(&ocs, &ad, now, &settings.reconcile);
    log_merge(&outcome.stats);

    let merged = outcome.records.len();
    let report = run_cycle(outcome.records, sink, &settings.sync).await;

    Ok(CycleSummary {
        merge: outcome.stats,
        merged,
        report,
    })
}

/// Compute a cycle without writing to the index.
pub async fn plan_cycle(
    asset: &dyn AssetSource,
    directory: &dyn DirectorySource,
    sink: &dyn IndexSink,
    settings: &CycleSettings,
    now: DateTime<Utc>,
) -> Result<CyclePlan> {
    let (ocs, ad) = pull_sources(asset, directory, settings.limit).await?;
    let outcome = merge(&ocs, &ad, now, &settings.reconcile);

    let (to_delete, deletion_skipped) = match collect_keys(sink, settings.sync.page_size).await {
        Ok(keys) if empty_purge_blocked(&outcome.records, &keys, &settings.sync) => {
            (Vec::new(), true)
        }
        Ok(keys) => (plan_orphans(&outcome.records, &keys), false),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Index enumeration failed");
            (Vec::new(), true)
        }
    };

    Ok(CyclePlan {
        to_upsert: outcome.records.len(),
        merge: outcome.stats,
        to_delete,
        deletion_skipped,
    })
}

fn log_merge(stats: &MergeStats) {
    info!(
        ocs = stats.ocs_records,
        ad = stats.ad_records,
        matched = stats.matched,
        ocs_only = stats.ocs_only,
        ad_only = stats.ad_only,
        "Sources merged"
    );
    if stats.skipped > 0 || stats.duplicates > 0 || stats.unparsable_timestamps > 0 {
        warn!(
            skipped = stats.skipped,
            duplicates = stats.duplicates,
            unparsable_timestamps = stats.unparsable_timestamps,
            "Source records needed attention"
        );
    }
}

fn log_cycle(summary: &CycleSummary) {
    let r = &summary.report;
    info!(
        merged = summary.merged,
        upserted = r.upserted,
        failed = r.failed,
        deleted = r.deleted,
        delete_failed = r.delete_failed,
        deletion_skipped = r.deletion_skipped,
        "Cycle complete"
    );
}

/// Repeat cycles every `period` until `shutdown` resolves. Returns the
/// number of cycles attempted.
///
/// Cycle errors are logged and the loop continues.
pub async fn run_loop<F>(
    asset: &dyn AssetSource,
    directory: &dyn DirectorySource,
    sink: Arc<dyn IndexSink>,
    settings: &CycleSettings,
    period: Duration,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(cycles, "Shutdown requested, stopping");
                break;
            }
            _ = ticker.tick() => {}
        }

        cycles += 1;
        match sync_once(asset, directory, Arc::clone(&sink), settings, Utc::now()).await {
            Ok(summary) => log_cycle(&summary),
            Err(e) => error!(cycle = cycles, error = %format!("{:#}", e), "Cycle skipped"),
        }
    }
    cycles
}

/// Production handles, connected up front.
pub struct Connections {
    pub asset: OcsConnector,
    pub directory: LdapDirectory,
    pub sink: Arc<ElasticsearchSink>,
}

/// Connect to OCS and the directory, and build the index client.
///
/// Any failure here is fatal to the caller.
pub async fn connect_all(config: &Config) -> Result<Connections> {
    let pool = db::connect(config.require_ocs()?).await?;
    let directory = LdapDirectory::new(config.require_directory()?.clone())?;
    directory
        .connect()
        .await
        .with_context(|| format!("Failed to bind to directory at {}", directory.url()))?;
    let sink = Arc::new(ElasticsearchSink::new(config.require_index()?)?);

    Ok(Connections {
        asset: OcsConnector::new(pool),
        directory,
        sink,
    })
}

/// `invsync sync`: one cycle, or a plan with `dry_run`.
pub async fn run_sync(config: &Config, dry_run: bool) -> Result<()> {
    let settings = CycleSettings::from_config(config)?;
    let conns = connect_all(config).await?;

    if dry_run {
        let plan = plan_cycle(
            &conns.asset,
            &conns.directory,
            conns.sink.as_ref(),
            &settings,
            Utc::now(),
        )
        .await?;
        println!("sync (dry-run)");
        print_merge(&plan.merge);
        println!("  would upsert: {}", plan.to_upsert);
        if plan.deletion_skipped {
            println!("  would delete: skipped");
        } else {
            println!("  would delete: {}", plan.to_delete.len());
            for id in &plan.to_delete {
                println!("    - {}", id);
            }
        }
        return Ok(());
    }

    let summary = sync_once(
        &conns.asset,
        &conns.directory,
        conns.sink.clone(),
        &settings,
        Utc::now(),
    )
    .await?;
    log_cycle(&summary);

    println!("sync");
    print_merge(&summary.merge);
    println!("  upserted: {}", summary.report.upserted);
    println!("  failed: {}", summary.report.failed);
    if summary.report.deletion_skipped {
        println!("  deleted: skipped");
    } else {
        println!("  deleted: {}", summary.report.deleted);
    }
    if summary.report.delete_failed > 0 {
        println!("  delete failures: {}", summary.report.delete_failed);
    }
    Ok(())
}

fn print_merge(stats: &MergeStats) {
    println!("  ocs records: {}", stats.ocs_records);
    println!("  ad records: {}", stats.ad_records);
    println!(
        "  merged: {} matched, {} ocs-only, {} ad-only",
        stats.matched, stats.ocs_only, stats.ad_only
    );
    if stats.skipped > 0 {
        println!("  skipped (no name): {}", stats.skipped);
    }
    if stats.duplicates > 0 {
        println!("  duplicates: {}", stats.duplicates);
    }
}

/// `invsync run`: connect (fail-fast), then cycle until Ctrl-C.
pub async fn run_service(config: &Config) -> Result<()> {
    let settings = CycleSettings::from_config(config)?;
    let conns = connect_all(config).await?;
    let period = Duration::from_secs(config.sync.interval_secs);

    info!(interval_secs = config.sync.interval_secs, "Sync service started");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    run_loop(
        &conns.asset,
        &conns.directory,
        conns.sink.clone(),
        &settings,
        period,
        shutdown,
    )
    .await;
    Ok(())
}
