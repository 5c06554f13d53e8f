//! Thumbsync - resumable catalog thumbnail downloader with WebP normalization
//!
//! This library fetches the binary assets behind a catalog of entries,
//! normalizes them to WebP, and checkpoints progress so interrupted runs
//! resume without redoing completed work.
//!
//! # Features
//!
//! - **Resumable Runs**: one checkpoint record per entry; completed work is
//!   never re-fetched
//! - **Bounded Concurrency**: independent limits for network fetches and
//!   CPU-bound transcodes
//! - **Automatic Retry**: exponential backoff for transient network failures
//! - **Content Deduplication**: byte-identical assets produce one artifact,
//!   whatever name they were fetched under
//! - **Partial-Failure Accounting**: a finished run always produces a
//!   report, failed entries included
//!
//! # Example
//!
//! ```no_run
//! use thumbsync::{JsonCatalogSource, PipelineConfig, PipelineCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let source = JsonCatalogSource::new("catalogs");
//!
//! let mut coordinator = PipelineCoordinator::new(config)?;
//! let report = coordinator
//!     .run(&source, CancellationToken::new(), false)
//!     .await?;
//! println!("{}/{} completed", report.completed, report.total_entries);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod naming;
pub mod report;
pub mod source;
pub mod transcode;
pub mod types;

pub use checkpoint::CheckpointStore;
pub use coordinator::PipelineCoordinator;
pub use dedup::{fingerprint, FingerprintIndex};
pub use error::PipelineError;
pub use fetch::{EntryFailure, FetchBatchReport, FetchScheduler};
pub use naming::{artifact_filename, sanitize_component};
pub use report::{FailureReport, GroupErrorReport, GroupReport, RunReport};
pub use source::{
    CatalogPage, CatalogSource, GroupDescriptor, JsonCatalogSource, StaticCatalogSource,
};
pub use transcode::{transcode, TranscodePolicy};
pub use types::{
    group_record_key, record_key, CatalogEntry, GroupRun, PipelineConfig, RunState, WorkRecord,
    WorkStatus,
};
