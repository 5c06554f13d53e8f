//! Pipeline orchestration: enumerate, partition, fetch, aggregate.

use crate::checkpoint::CheckpointStore;
use crate::dedup::FingerprintIndex;
use crate::error::PipelineError;
use crate::fetch::FetchScheduler;
use crate::naming;
use crate::report::{FailureReport, GroupErrorReport, GroupReport, RunReport};
use crate::source::{CatalogSource, GroupDescriptor};
use crate::types::{
    group_record_key, CatalogEntry, GroupRun, PipelineConfig, RunState, WorkRecord, WorkStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sequences the run phases and owns all checkpoint writes.
///
/// The coordinator is the only component that transitions work records in
/// storage. Workers report outcomes back through the scheduler's return
/// path, which keeps the checkpoint directory consistent even with highly
/// parallel fetch workers.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    store: CheckpointStore,
    index: Arc<FingerprintIndex>,
    state: RunState,
}

impl PipelineCoordinator {
    /// Opens the checkpoint store and prepares a run.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let store = CheckpointStore::open(&config.checkpoint_dir)?;
        Ok(Self {
            config,
            store,
            index: Arc::new(FingerprintIndex::new()),
            state: RunState::NotStarted,
        })
    }

    /// Current phase of the run.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The checkpoint store backing this run.
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs the pipeline to completion (or until `cancel` fires).
    ///
    /// Ordinary per-entry failures are contained and reported; the run
    /// only aborts when checkpoint persistence itself fails, since losing
    /// the ability to record progress risks duplicate work or lost
    /// results.
    pub async fn run(
        &mut self,
        source: &dyn CatalogSource,
        cancel: CancellationToken,
        show_progress: bool,
    ) -> Result<RunReport, PipelineError> {
        match self.run_inner(source, cancel, show_progress).await {
            Ok(report) => {
                self.state = RunState::Done;
                Ok(report)
            }
            Err(e) => {
                if matches!(e, PipelineError::Persistence(_)) {
                    error!("❌ Checkpoint store failure, aborting run: {}", e);
                    self.state = RunState::Aborted;
                }
                Err(e)
            }
        }
    }

    async fn run_inner(
        &mut self,
        source: &dyn CatalogSource,
        cancel: CancellationToken,
        show_progress: bool,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();

        self.state = RunState::Enumerating;
        info!("🔍 Enumerating catalog groups");
        let groups = source.groups().await?;
        info!("Found {} group(s)", groups.len());

        let mut catalogs: Vec<(GroupDescriptor, Vec<CatalogEntry>)> = Vec::new();
        let mut group_errors = Vec::new();
        for group in groups {
            if cancel.is_cancelled() {
                break;
            }
            match source.entries(&group).await {
                Ok(page) => {
                    if !page.is_complete {
                        warn!(
                            "⚠️  Catalog for {} reported incomplete, processing what was returned",
                            group.display_name
                        );
                    }
                    catalogs.push((group, dedup_entries(page.entries)));
                }
                Err(e) => {
                    error!("❌ Cannot enumerate {}: {}", group.display_name, e);
                    group_errors.push(GroupErrorReport {
                        group_key: group.key.clone(),
                        reason: e.failure_reason(),
                    });
                }
            }
        }

        if self.config.clean_start {
            let mut removed = 0;
            for (group, _) in &catalogs {
                removed += self.store.clear_group(&group.key)?;
            }
            info!("🧹 Discarded {} prior checkpoint record(s)", removed);
        } else {
            self.seed_fingerprints(&catalogs)?;
        }

        self.state = RunState::Fetching;
        std::fs::create_dir_all(&self.config.output_dir)?;
        let scheduler = FetchScheduler::new(&self.config, Arc::clone(&self.index))?;

        let total_entries: usize = catalogs.iter().map(|(_, entries)| entries.len()).sum();
        let pb = if show_progress {
            let bar = ProgressBar::new(total_entries as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}")
                    .unwrap()
                    .progress_chars("█▓▒░ "),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(format!(
            "📦 Fetching {} entries from {} group(s)",
            total_entries,
            catalogs.len()
        ));

        let mut report = RunReport {
            total_entries,
            group_errors,
            elapsed_seconds: 0.0,
            ..RunReport::default()
        };

        for (group, entries) in &catalogs {
            if cancel.is_cancelled() {
                info!("🛑 Cancellation requested, skipping remaining groups");
                break;
            }
            let group_dir = self
                .config
                .output_dir
                .join(naming::sanitize_component(&group.display_name));
            std::fs::create_dir_all(&group_dir)?;

            debug!("Processing {} entries for {}", entries.len(), group.display_name);
            let batch = scheduler
                .run_group(group, &group_dir, entries, &self.store, &cancel, &pb)
                .await?;
            report.skipped += batch.skipped + batch.cancelled;

            let (group_run, failures) =
                self.rebuild_group_run(&group.key, entries.len(), &group_dir)?;
            self.store
                .put(&group_record_key(&group.key), &group_run)?;

            report.completed += group_run.completed_count;
            report.failed += group_run.failed_count;
            report.skipped_duplicates += group_run.skipped_duplicate_count;
            report.groups.push(GroupReport {
                group_key: group.key.clone(),
                display_name: group.display_name.clone(),
                total_entries: group_run.total_entries,
                completed: group_run.completed_count,
                failed: group_run.failed_count,
                skipped_duplicates: group_run.skipped_duplicate_count,
                output_directory: group_run.output_directory.clone(),
            });
            report.failures.extend(failures);

            info!(
                "✅ {} done: {}/{} completed, {} failed",
                group.display_name,
                group_run.completed_count,
                group_run.total_entries,
                group_run.failed_count
            );
        }
        pb.finish_with_message("📦 Fetch phase finished");

        self.state = RunState::Aggregating;
        report.elapsed_seconds = started.elapsed().as_secs_f64();

        let report_path = self.config.output_dir.join("run_report.json");
        report.write_json(&report_path)?;
        info!("📝 Report written to {}", report_path.display());
        report.log_summary();

        Ok(report)
    }

    /// Recomputes a group's aggregate from its work records. The persisted
    /// aggregate is never trusted across runs; this recomputation is what
    /// keeps resumed runs free of drift.
    fn rebuild_group_run(
        &self,
        group_key: &str,
        total_entries: usize,
        group_dir: &Path,
    ) -> Result<(GroupRun, Vec<FailureReport>), PipelineError> {
        let mut run = GroupRun {
            total_entries,
            output_directory: group_dir.display().to_string(),
            ..GroupRun::default()
        };
        let mut failures = Vec::new();
        let prefix = format!("{}:", group_key);
        for (key, record) in self.store.group_records::<WorkRecord>(group_key)? {
            match record.status {
                WorkStatus::Completed => {
                    run.completed_count += 1;
                    if record.duplicate {
                        run.skipped_duplicate_count += 1;
                    }
                }
                WorkStatus::Failed => {
                    run.failed_count += 1;
                    failures.push(FailureReport {
                        group_key: group_key.to_string(),
                        entity_id: key.strip_prefix(&prefix).unwrap_or(&key).to_string(),
                        reason: record
                            .failure_reason
                            .unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                WorkStatus::Pending | WorkStatus::InProgress => {}
            }
        }
        Ok((run, failures))
    }

    /// Pre-registers fingerprints from prior completed records so a
    /// resumed run keeps deduplicating against artifacts that already
    /// exist on disk.
    fn seed_fingerprints(
        &self,
        catalogs: &[(GroupDescriptor, Vec<CatalogEntry>)],
    ) -> Result<(), PipelineError> {
        let mut seeded = 0usize;
        for (group, _) in catalogs {
            for (_, record) in self.store.group_records::<WorkRecord>(&group.key)? {
                if record.status != WorkStatus::Completed || record.duplicate {
                    continue;
                }
                if let (Some(fingerprint), Some(path)) =
                    (&record.content_fingerprint, &record.output_path)
                {
                    self.index.seed(fingerprint, path);
                    seeded += 1;
                }
            }
        }
        if seeded > 0 {
            debug!("Seeded {} fingerprint(s) from prior runs", seeded);
        }
        Ok(())
    }
}

/// Drops repeated entity ids, keeping first occurrence. Catalog files can
/// overlap when a group was fetched in several batches.
fn dedup_entries(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen.insert(entry.entity_id.clone()) {
            out.push(entry);
        }
    }
    out
}
