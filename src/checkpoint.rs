//! Checkpoint persistence for resumable runs.
//!
//! One JSON file per key under the checkpoint directory. Keys are opaque
//! strings encoded into filenames, so writes to distinct keys never
//! contend. Same-key serialization is the coordinator's job: workers never
//! write the store, so every key has a single writer within a run.

use crate::error::PipelineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Durable key/value store backed by one file per key.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// Probes writability up front so an unusable store surfaces before
    /// any work is dispatched, not halfway through a run.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "cannot create checkpoint directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        tempfile::NamedTempFile::new_in(&dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "checkpoint directory {} is not writable: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    /// Directory this store persists into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    /// Persists `record` under `key`, replacing any prior value. The write
    /// is atomic (temp file + rename) and durable on return.
    pub fn put<T: Serialize>(&self, key: &str, record: &T) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| PipelineError::Persistence(format!("cannot serialize {}: {}", key, e)))?;
        let target = self.path_for_key(key);
        atomic_write(&self.dir, &target, json.as_bytes())
            .map_err(|e| PipelineError::Persistence(format!("cannot write {}: {}", key, e)))
    }

    /// Point lookup. Absent keys return `None`. An unreadable or corrupt
    /// record is reported and treated as absent so the entry gets redone
    /// rather than wedging the run.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PipelineError> {
        let path = self.path_for_key(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::Persistence(format!(
                    "cannot read {}: {}",
                    key, e
                )))
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding corrupt checkpoint record {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Whether a record exists for `key`.
    pub fn exists(&self, key: &str) -> bool {
        self.path_for_key(key).exists()
    }

    /// Removes the record for `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), PipelineError> {
        match fs::remove_file(self.path_for_key(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Persistence(format!(
                "cannot delete {}: {}",
                key, e
            ))),
        }
    }

    /// All keys under `group_key`, including the aggregate record's key if
    /// present. Sorted for deterministic iteration.
    pub fn group_keys(&self, group_key: &str) -> Result<Vec<String>, PipelineError> {
        let prefix = format!("{}:", group_key);
        let mut keys = Vec::new();
        let dir_iter = fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "cannot enumerate checkpoint directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        for dir_entry in dir_iter {
            let dir_entry = dir_entry.map_err(|e| {
                PipelineError::Persistence(format!("cannot enumerate checkpoints: {}", e))
            })?;
            let name = dir_entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Some(key) = decode_key(stem) else {
                warn!("Ignoring unrecognized checkpoint file {:?}", name);
                continue;
            };
            if key.starts_with(&prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// All decodable records under `group_key`, excluding the group's own
    /// aggregate record. Records of a different shape are skipped.
    pub fn group_records<T: DeserializeOwned>(
        &self,
        group_key: &str,
    ) -> Result<Vec<(String, T)>, PipelineError> {
        let aggregate = crate::types::group_record_key(group_key);
        let mut records = Vec::new();
        for key in self.group_keys(group_key)? {
            if key == aggregate {
                continue;
            }
            if let Some(record) = self.get(&key)? {
                records.push((key, record));
            }
        }
        Ok(records)
    }

    /// Deletes every record under `group_key`, aggregate included.
    /// Returns how many records were removed.
    pub fn clear_group(&self, group_key: &str) -> Result<usize, PipelineError> {
        let keys = self.group_keys(group_key)?;
        let count = keys.len();
        for key in keys {
            self.delete(&key)?;
        }
        Ok(count)
    }
}

fn atomic_write(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Encodes an opaque key into a filesystem-safe filename. Alphanumerics
/// and `-`, `_`, `.` pass through; every other byte becomes `%XX`, so
/// arbitrary keys round-trip losslessly.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut chars = encoded.bytes();
    while let Some(byte) = chars.next() {
        if byte == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}
