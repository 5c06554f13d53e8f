//! Content fingerprinting and duplicate detection.
//!
//! Byte-identical assets fetched under different names produce one artifact:
//! the first entry writes it, later entries reference it. MD5 is a
//! duplicate-detection aid here, not a security control.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Mutex;

/// Computes the content fingerprint of `bytes` as lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Process-wide map from content fingerprint to the first artifact path
/// written for that content. Append-only for the duration of a run, shared
/// across all workers and groups.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    inner: Mutex<HashMap<String, String>>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers a fingerprint from a prior run's completed record so
    /// resumed runs keep deduplicating against already-written artifacts.
    pub fn seed(&self, fingerprint: &str, output_path: &str) {
        let mut map = self.inner.lock().unwrap();
        map.entry(fingerprint.to_string())
            .or_insert_with(|| output_path.to_string());
    }

    /// Atomically checks and inserts. Returns `(true, None)` when this
    /// caller is the first to see the fingerprint and must write the
    /// artifact, or `(false, Some(existing))` when an identical-content
    /// artifact already exists and no new file must be written.
    pub fn register_if_new(
        &self,
        fingerprint: &str,
        output_path: &str,
    ) -> (bool, Option<String>) {
        let mut map = self.inner.lock().unwrap();
        match map.get(fingerprint) {
            Some(existing) => (false, Some(existing.clone())),
            None => {
                map.insert(fingerprint.to_string(), output_path.to_string());
                (true, None)
            }
        }
    }

    /// Rolls back a registration whose artifact write failed, so later
    /// duplicates do not reference a file that was never written.
    pub(crate) fn remove(&self, fingerprint: &str) {
        self.inner.lock().unwrap().remove(fingerprint);
    }

    /// Number of distinct fingerprints seen.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
