//! Data structures for pipeline operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One unit of work: a remote asset to fetch, normalized at the catalog
/// source boundary so the pipeline never branches on alternate field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Stable unique key within its group. Keys checkpoint and dedup state.
    pub entity_id: String,
    /// Logical namespace the entry belongs to; determines output placement.
    pub group_key: String,
    /// Human-readable name, used to derive the output filename.
    pub display_name: String,
    /// Source location of the binary asset. Empty means the entry is
    /// skipped, which is not an error.
    pub asset_url: String,
}

impl CatalogEntry {
    /// Checkpoint key for this entry's work record.
    pub fn record_key(&self) -> String {
        record_key(&self.group_key, &self.entity_id)
    }
}

/// Checkpoint key for one entry within a group.
pub fn record_key(group_key: &str, entity_id: &str) -> String {
    format!("{}:{}", group_key, entity_id)
}

/// Checkpoint key for a group's aggregate record.
pub fn group_record_key(group_key: &str) -> String {
    format!("{}:__group__", group_key)
}

/// Processing state of one catalog entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Seen but not yet claimed by the scheduler.
    Pending,
    /// Claimed by the scheduler; outcome unknown. A record still in this
    /// state at the start of a run belongs to an interrupted run and is
    /// retried.
    InProgress,
    /// Artifact written (or deduplicated against an existing one).
    Completed,
    /// Retries exhausted or a permanent per-entry error occurred.
    Failed,
}

/// Persisted outcome of processing one catalog entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkRecord {
    pub status: WorkStatus,
    /// Fetch attempts made so far, cumulative across runs until success.
    pub attempts: u32,
    /// Content fingerprint of the fetched bytes, set once fetched.
    pub content_fingerprint: Option<String>,
    /// Path of the written artifact. For duplicates this references the
    /// artifact first written for the same content.
    pub output_path: Option<String>,
    /// True when the entry completed by referencing another entry's
    /// identical-content artifact instead of writing its own.
    #[serde(default)]
    pub duplicate: bool,
    /// Reason string for the most recent failure, if any.
    pub failure_reason: Option<String>,
    /// Unix timestamp (seconds) of the last state transition.
    pub last_updated: i64,
}

impl WorkRecord {
    /// Fresh record for a newly seen entry.
    pub fn pending() -> Self {
        Self {
            status: WorkStatus::Pending,
            attempts: 0,
            content_fingerprint: None,
            output_path: None,
            duplicate: false,
            failure_reason: None,
            last_updated: unix_now(),
        }
    }

    /// Refreshes the last-updated timestamp.
    pub fn touch(&mut self) {
        self.last_updated = unix_now();
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Aggregate progress for one group, rebuilt from work records on every
/// run. The persisted copy is informational only and never trusted as
/// authoritative across runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRun {
    pub total_entries: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_duplicate_count: usize,
    pub output_directory: String,
}

/// Phase of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Enumerating,
    Fetching,
    Aggregating,
    Done,
    /// Terminal state reached only on a fatal, non-entry-scoped error
    /// such as an unusable checkpoint store.
    Aborted,
}

/// Configuration for a pipeline run.
///
/// # Example
///
/// ```
/// use thumbsync::PipelineConfig;
///
/// let config = PipelineConfig {
///     fetch_concurrency: 8,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(config.quality, 85);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory artifacts are written under, one subdirectory per group.
    pub output_dir: PathBuf,
    /// Directory holding checkpoint records.
    pub checkpoint_dir: PathBuf,
    /// Maximum concurrent asset fetches.
    ///
    /// Note: fetches are I/O-bound, so this is not limited by CPU cores.
    /// The limiting factor is network bandwidth.
    pub fetch_concurrency: usize,
    /// Maximum concurrent transcodes. CPU-bound; also caps how many
    /// decoded images are held in memory at once.
    pub transcode_concurrency: usize,
    /// Total fetch attempts per entry before it is recorded as failed.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub retry_base_delay: Duration,
    /// Per-attempt timeout covering connect and transfer.
    pub request_timeout: Duration,
    /// Bodies smaller than this are rejected without decoding. Guards
    /// against error pages served with a success status.
    pub min_asset_bytes: usize,
    /// Maximum output long-edge dimension. Larger images are downscaled
    /// preserving aspect ratio; smaller ones are never upscaled.
    pub max_dimension: u32,
    /// WebP quality level (0-100).
    pub quality: u8,
    /// Re-fetch entries even when a completed checkpoint exists.
    pub force_refetch: bool,
    /// Discard all prior checkpoints for the run's groups before starting.
    pub clean_start: bool,
    /// Re-attempt entries recorded as failed by a previous run.
    pub retry_failed: bool,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("thumbnails"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            fetch_concurrency: 5,
            transcode_concurrency: 2,
            max_retries: 5,
            retry_base_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            min_asset_bytes: 100,
            max_dimension: 1024,
            quality: 85,
            force_refetch: false,
            clean_start: false,
            retry_failed: true,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}
