//! Run report: the machine-readable summary emitted at the end of a run.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Summary of one pipeline run.
///
/// Completed/failed/duplicate counts are recomputed from checkpoint
/// records, so they are stable across resumed runs of an unchanged
/// catalog. `skipped` counts entries this particular run did not have to
/// process.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub total_entries: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub skipped_duplicates: usize,
    pub elapsed_seconds: f64,
    pub groups: Vec<GroupReport>,
    pub group_errors: Vec<GroupErrorReport>,
    pub failures: Vec<FailureReport>,
}

/// Per-group breakdown.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub group_key: String,
    pub display_name: String,
    pub total_entries: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped_duplicates: usize,
    pub output_directory: String,
}

/// A group whose catalog could not be enumerated this run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupErrorReport {
    pub group_key: String,
    pub reason: String,
}

/// One entry recorded as failed, with the reason from its work record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub group_key: String,
    pub entity_id: String,
    pub reason: String,
}

impl RunReport {
    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Logs a human-readable summary.
    pub fn log_summary(&self) {
        let elapsed = humantime::format_duration(Duration::from_secs(self.elapsed_seconds as u64));
        info!(
            "📊 {} entries: {} completed ({} as duplicates), {} failed, {} skipped in {}",
            self.total_entries,
            self.completed,
            self.skipped_duplicates,
            self.failed,
            self.skipped,
            elapsed
        );
        for group in &self.groups {
            info!(
                "   {}: {}/{} completed, {} failed -> {}",
                group.display_name,
                group.completed,
                group.total_entries,
                group.failed,
                group.output_directory
            );
        }
        for group_error in &self.group_errors {
            info!("   ⚠️  {}: catalog unavailable ({})", group_error.group_key, group_error.reason);
        }
    }
}
