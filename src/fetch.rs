//! Bounded-concurrency asset fetching.
//!
//! The scheduler claims each entry in checkpoint storage, dispatches it to
//! a worker task gated by the fetch semaphore, and applies every outcome
//! from a single loop. Workers never write the checkpoint store, so each
//! record has exactly one writer even with highly parallel fetches.

use crate::checkpoint::CheckpointStore;
use crate::dedup::{self, FingerprintIndex};
use crate::error::{classify_transport_error, PipelineError};
use crate::naming;
use crate::source::GroupDescriptor;
use crate::transcode::{transcode, TranscodePolicy};
use crate::types::{CatalogEntry, PipelineConfig, WorkRecord, WorkStatus};
use futures_util::StreamExt;
use indicatif::ProgressBar;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-entry failure surfaced in batch results and run reports.
#[derive(Debug, Clone)]
pub struct EntryFailure {
    pub entity_id: String,
    pub reason: String,
}

/// Result of scheduling one batch of entries.
#[derive(Debug, Default)]
pub struct FetchBatchReport {
    /// Entries whose work record reached `Completed` this batch,
    /// duplicates included.
    pub completed: usize,
    /// Entries whose work record reached `Failed` this batch.
    pub failed: usize,
    /// Entries not dispatched: already satisfied by a checkpoint, missing
    /// an asset URL, or excluded by the failed-entry policy.
    pub skipped: usize,
    /// Subset of `completed` that referenced an existing identical-content
    /// artifact instead of writing a new file.
    pub duplicates: usize,
    /// Entries returned to `Pending` because cancellation was requested
    /// before their fetch started.
    pub cancelled: usize,
    pub failures: Vec<EntryFailure>,
    /// Work records as written this batch, keyed by checkpoint key.
    pub records: Vec<(String, WorkRecord)>,
}

/// Executes fetches with bounded parallelism, retry with exponential
/// backoff, content deduplication, and transcoding.
pub struct FetchScheduler {
    client: reqwest::Client,
    fetch_permits: Arc<Semaphore>,
    transcode_permits: Arc<Semaphore>,
    index: Arc<FingerprintIndex>,
    policy: TranscodePolicy,
    max_retries: u32,
    backoff_factor: u64,
    force_refetch: bool,
    retry_failed: bool,
}

impl FetchScheduler {
    /// Builds a scheduler from the run configuration. The HTTP client is
    /// shared by all workers so connections can be reused.
    pub fn new(
        config: &PipelineConfig,
        index: Arc<FingerprintIndex>,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(10)))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                PipelineError::Io(io::Error::other(format!("cannot build HTTP client: {}", e)))
            })?;
        Ok(Self {
            client,
            fetch_permits: Arc::new(Semaphore::new(config.fetch_concurrency.max(1))),
            transcode_permits: Arc::new(Semaphore::new(config.transcode_concurrency.max(1))),
            index,
            policy: TranscodePolicy {
                quality: config.quality,
                max_dimension: config.max_dimension,
                min_input_bytes: config.min_asset_bytes,
            },
            max_retries: config.max_retries.max(1),
            // Delays double starting from the base: base, 2*base, 4*base...
            backoff_factor: (config.retry_base_delay.as_millis() as u64 / 2).max(1),
            force_refetch: config.force_refetch,
            retry_failed: config.retry_failed,
        })
    }

    /// Processes one group's entries.
    ///
    /// Entries already satisfied by a `Completed` checkpoint are skipped
    /// without a network call unless the run forces a re-fetch. Every
    /// dispatched entry is claimed (`InProgress`) before its worker
    /// starts, so no entry is processed twice concurrently within a run.
    /// One entry's failure never aborts the batch; only checkpoint
    /// persistence failures do.
    pub async fn run_group(
        &self,
        group: &GroupDescriptor,
        group_dir: &Path,
        entries: &[CatalogEntry],
        store: &CheckpointStore,
        cancel: &CancellationToken,
        pb: &ProgressBar,
    ) -> Result<FetchBatchReport, PipelineError> {
        let mut report = FetchBatchReport::default();
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            transcode_permits: Arc::clone(&self.transcode_permits),
            index: Arc::clone(&self.index),
            policy: self.policy.clone(),
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
            group_display: group.display_name.clone(),
            group_dir: group_dir.to_path_buf(),
            pb: pb.clone(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dispatched = 0usize;

        for entry in entries {
            if cancel.is_cancelled() {
                debug!(
                    "Cancellation requested, leaving remaining entries of {} untouched",
                    group.display_name
                );
                break;
            }
            if entry.asset_url.is_empty() {
                debug!("No asset URL for {}, skipping", entry.display_name);
                report.skipped += 1;
                pb.inc(1);
                continue;
            }

            let key = entry.record_key();
            let prior = store.get::<WorkRecord>(&key)?;
            if let Some(record) = &prior {
                let satisfied = record.status == WorkStatus::Completed && !self.force_refetch;
                let held_back = record.status == WorkStatus::Failed && !self.retry_failed;
                if satisfied || held_back {
                    report.skipped += 1;
                    pb.inc(1);
                    continue;
                }
            }

            // Claim before dispatch. A record found in this state by a
            // later run belongs to an interrupted one and gets retried.
            let mut record = prior.unwrap_or_else(WorkRecord::pending);
            record.status = WorkStatus::InProgress;
            record.touch();
            store.put(&key, &record)?;

            let ctx = Arc::clone(&ctx);
            let fetch_permits = Arc::clone(&self.fetch_permits);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let entry = entry.clone();
            tokio::spawn(async move {
                let permit = fetch_permits.acquire_owned().await.unwrap();
                let outcome = process_entry(ctx, entry, key, permit, cancel).await;
                let _ = tx.send(outcome);
            });
            dispatched += 1;
        }
        drop(tx);

        // Single-writer drain: all checkpoint updates for this batch are
        // applied here, in completion order.
        let mut applied = 0usize;
        while let Some(outcome) = rx.recv().await {
            let record = self.apply_outcome(store, &outcome, &mut report)?;
            report.records.push((outcome.key, record));
            pb.inc(1);
            applied += 1;
        }
        debug_assert_eq!(applied, dispatched);

        Ok(report)
    }

    fn apply_outcome(
        &self,
        store: &CheckpointStore,
        outcome: &EntryOutcome,
        report: &mut FetchBatchReport,
    ) -> Result<WorkRecord, PipelineError> {
        let mut record = store
            .get::<WorkRecord>(&outcome.key)?
            .unwrap_or_else(WorkRecord::pending);
        record.attempts = record.attempts.saturating_add(outcome.attempts);
        match &outcome.kind {
            OutcomeKind::Completed {
                fingerprint,
                output_path,
                duplicate,
            } => {
                record.status = WorkStatus::Completed;
                record.content_fingerprint = Some(fingerprint.clone());
                record.output_path = Some(output_path.clone());
                record.duplicate = *duplicate;
                record.failure_reason = None;
                report.completed += 1;
                if *duplicate {
                    report.duplicates += 1;
                }
            }
            OutcomeKind::Failed { reason } => {
                warn!("Entry {} failed: {}", outcome.entity_id, reason);
                record.status = WorkStatus::Failed;
                record.failure_reason = Some(reason.clone());
                report.failed += 1;
                report.failures.push(EntryFailure {
                    entity_id: outcome.entity_id.clone(),
                    reason: reason.clone(),
                });
            }
            OutcomeKind::Cancelled => {
                record.status = WorkStatus::Pending;
                report.cancelled += 1;
            }
        }
        record.touch();
        store.put(&outcome.key, &record)?;
        Ok(record)
    }
}

struct WorkerContext {
    client: reqwest::Client,
    transcode_permits: Arc<Semaphore>,
    index: Arc<FingerprintIndex>,
    policy: TranscodePolicy,
    max_retries: u32,
    backoff_factor: u64,
    group_display: String,
    group_dir: PathBuf,
    pb: ProgressBar,
}

#[derive(Debug)]
enum OutcomeKind {
    Completed {
        fingerprint: String,
        output_path: String,
        duplicate: bool,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

#[derive(Debug)]
struct EntryOutcome {
    key: String,
    entity_id: String,
    /// Fetch attempts made by this dispatch.
    attempts: u32,
    kind: OutcomeKind,
}

/// Runs one entry through fetch, dedup, transcode and artifact write.
/// The fetch permit is released as soon as the network work is done so
/// transcoding does not hold up other downloads.
async fn process_entry(
    ctx: Arc<WorkerContext>,
    entry: CatalogEntry,
    key: String,
    permit: OwnedSemaphorePermit,
    cancel: CancellationToken,
) -> EntryOutcome {
    if cancel.is_cancelled() {
        return EntryOutcome {
            key,
            entity_id: entry.entity_id,
            attempts: 0,
            kind: OutcomeKind::Cancelled,
        };
    }

    ctx.pb
        .set_message(format!("| ⬇️  Fetching: {}", entry.display_name));

    let attempts = Arc::new(AtomicU32::new(0));
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(ctx.backoff_factor)
        .take(ctx.max_retries.saturating_sub(1) as usize);

    let fetch_result = Retry::spawn(strategy, || {
        let client = ctx.client.clone();
        let url = entry.asset_url.clone();
        let min_bytes = ctx.policy.min_input_bytes;
        let attempts = Arc::clone(&attempts);
        async move {
            attempts.fetch_add(1, Ordering::Relaxed);
            match fetch_asset(&client, &url, min_bytes).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.is_permanent() => RetryError::to_permanent(e),
                Err(e) => {
                    warn!("Fetch attempt for {} failed: {}", url, e);
                    RetryError::to_transient(e)
                }
            }
        }
    })
    .await;
    drop(permit);

    let attempts_made = attempts.load(Ordering::Relaxed);
    let bytes = match fetch_result {
        Ok(bytes) => bytes,
        Err(e) => {
            return EntryOutcome {
                key,
                entity_id: entry.entity_id,
                attempts: attempts_made,
                kind: OutcomeKind::Failed {
                    reason: e.failure_reason(),
                },
            }
        }
    };

    let fingerprint = dedup::fingerprint(&bytes);
    let filename = naming::artifact_filename(&ctx.group_display, &entry.display_name);
    let output_path = ctx.group_dir.join(&filename);
    let output_display = output_path.display().to_string();

    let kind = match ctx.index.register_if_new(&fingerprint, &output_display) {
        (false, Some(existing)) => {
            debug!(
                "Content of {} matches existing artifact {}",
                entry.display_name, existing
            );
            OutcomeKind::Completed {
                fingerprint,
                output_path: existing,
                duplicate: true,
            }
        }
        _ => match transcode_and_write(&ctx, bytes, &output_path).await {
            Ok(()) => OutcomeKind::Completed {
                fingerprint,
                output_path: output_display,
                duplicate: false,
            },
            Err(e) => {
                // Without the rollback, later identical-content entries
                // would reference an artifact that was never written.
                ctx.index.remove(&fingerprint);
                OutcomeKind::Failed {
                    reason: e.failure_reason(),
                }
            }
        },
    };

    EntryOutcome {
        key,
        entity_id: entry.entity_id,
        attempts: attempts_made,
        kind,
    }
}

/// One fetch attempt. Non-success statuses and transport failures are
/// transient; a body below the minimum size is a permanent invalid-asset
/// failure since the origin will keep serving it.
async fn fetch_asset(
    client: &reqwest::Client,
    url: &str,
    min_bytes: usize,
) -> Result<Vec<u8>, PipelineError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(classify_transport_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::TransientFetch(format!(
            "HTTP {} from {}",
            status, url
        )));
    }

    let capacity = response.content_length().unwrap_or(0) as usize;
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();
    while let Some(piece) = stream.next().await {
        let chunk = piece.map_err(classify_transport_error)?;
        bytes.extend_from_slice(&chunk);
    }

    if bytes.len() < min_bytes {
        return Err(PipelineError::InvalidAsset(format!(
            "{} returned {} bytes, below the {} byte minimum",
            url,
            bytes.len(),
            min_bytes
        )));
    }
    Ok(bytes)
}

/// Transcodes under the transcode concurrency cap and writes the artifact
/// atomically. The checkpoint update happens only after this returns, so
/// a crash can never leave a completed record pointing at a missing file.
async fn transcode_and_write(
    ctx: &WorkerContext,
    bytes: Vec<u8>,
    output_path: &Path,
) -> Result<(), PipelineError> {
    let _permit = ctx.transcode_permits.acquire().await.unwrap();
    let policy = ctx.policy.clone();
    let artifact = tokio::task::spawn_blocking(move || transcode(&bytes, &policy))
        .await
        .map_err(|e| PipelineError::Transcode(format!("transcode task failed: {}", e)))??;
    write_artifact(output_path, &artifact)
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = path
        .parent()
        .ok_or_else(|| PipelineError::Io(io::Error::other("artifact path has no parent")))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}
