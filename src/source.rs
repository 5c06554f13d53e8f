//! Catalog enumeration.
//!
//! Sources normalize whatever shape the upstream data has into
//! [`CatalogEntry`] at this boundary. The pipeline core never branches on
//! alternate field spellings, and pagination policy (when a batch counts
//! as the complete result set) lives entirely inside source
//! implementations, surfaced through [`CatalogPage::is_complete`].

use crate::error::PipelineError;
use crate::types::CatalogEntry;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One group (provider/category namespace) the catalog exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescriptor {
    /// Stable key; scopes checkpoint records and output placement.
    pub key: String,
    /// Human-readable name; the first half of artifact filenames.
    pub display_name: String,
}

/// The entries a source produced for one group.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub entries: Vec<CatalogEntry>,
    /// Whether the source considers this the group's complete result set.
    pub is_complete: bool,
}

/// A restartable, idempotent catalog: repeated calls for the same group
/// return the same entries (or a superset), never a different identity
/// for the same logical entry.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Enumerates the groups this source knows about.
    async fn groups(&self) -> Result<Vec<GroupDescriptor>, PipelineError>;

    /// Enumerates the entries of one group.
    async fn entries(&self, group: &GroupDescriptor) -> Result<CatalogPage, PipelineError>;
}

/// Fixed in-memory catalog. Useful for curated group lists and tests.
#[derive(Debug, Default)]
pub struct StaticCatalogSource {
    groups: Vec<(GroupDescriptor, Vec<CatalogEntry>)>,
}

impl StaticCatalogSource {
    pub fn new(groups: Vec<(GroupDescriptor, Vec<CatalogEntry>)>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn groups(&self) -> Result<Vec<GroupDescriptor>, PipelineError> {
        Ok(self.groups.iter().map(|(g, _)| g.clone()).collect())
    }

    async fn entries(&self, group: &GroupDescriptor) -> Result<CatalogPage, PipelineError> {
        let entries = self
            .groups
            .iter()
            .find(|(g, _)| g.key == group.key)
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default();
        Ok(CatalogPage {
            entries,
            is_complete: true,
        })
    }
}

/// Reads per-group catalog files (`*.json`) from a directory.
///
/// Accepts both historical layouts: a nested `provider` object or a flat
/// `provider_name` field, and per-game `title`/`name` and
/// `thumbnail_url`/`thumbnailUrl` spellings. Several files may describe
/// the same group; their games are merged and deduplicated by id.
#[derive(Debug)]
pub struct JsonCatalogSource {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    provider: Option<ProviderBlock>,
    #[serde(default)]
    provider_name: Option<String>,
    #[serde(default)]
    games: Vec<GameRow>,
    /// Sources that paginate mark partial files; absent means complete.
    #[serde(default)]
    is_complete: Option<bool>,
}

#[derive(Deserialize)]
struct ProviderBlock {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Deserialize)]
struct GameRow {
    #[serde(default, alias = "id")]
    game_id: Option<String>,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default, alias = "thumbnailUrl")]
    thumbnail_url: Option<String>,
}

impl JsonCatalogSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Parses every catalog file in the directory. Unparseable files are
    /// reported and skipped; an unreadable directory is a source error.
    fn scan(&self) -> Result<Vec<(PathBuf, CatalogFile)>, PipelineError> {
        let dir_iter = std::fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::Source(format!(
                "cannot read catalog directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        let mut files = Vec::new();
        for dir_entry in dir_iter {
            let dir_entry =
                dir_entry.map_err(|e| PipelineError::Source(format!("cannot scan catalog: {}", e)))?;
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::Source(format!("cannot read {}: {}", path.display(), e))
            })?;
            match serde_json::from_str::<CatalogFile>(&content) {
                Ok(file) => files.push((path, file)),
                Err(e) => warn!("Skipping unparseable catalog file {}: {}", path.display(), e),
            }
        }
        files.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(files)
    }
}

fn descriptor_for(path: &Path, file: &CatalogFile) -> GroupDescriptor {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("catalog")
        .to_string();
    let (name, slug) = match &file.provider {
        Some(block) => (block.name.clone(), block.slug.clone()),
        None => (file.provider_name.clone(), None),
    };
    let key = slug
        .or_else(|| name.clone())
        .unwrap_or_else(|| stem.clone());
    let display_name = name.unwrap_or_else(|| key.clone());
    GroupDescriptor { key, display_name }
}

#[async_trait]
impl CatalogSource for JsonCatalogSource {
    async fn groups(&self) -> Result<Vec<GroupDescriptor>, PipelineError> {
        let mut seen = HashSet::new();
        let mut groups = Vec::new();
        for (path, file) in self.scan()? {
            let descriptor = descriptor_for(&path, &file);
            if seen.insert(descriptor.key.clone()) {
                groups.push(descriptor);
            }
        }
        Ok(groups)
    }

    async fn entries(&self, group: &GroupDescriptor) -> Result<CatalogPage, PipelineError> {
        let mut seen_ids = HashSet::new();
        let mut entries = Vec::new();
        let mut is_complete = true;
        for (path, file) in self.scan()? {
            if descriptor_for(&path, &file).key != group.key {
                continue;
            }
            if file.is_complete == Some(false) {
                is_complete = false;
            }
            for game in file.games {
                let Some(game_id) = game.game_id.filter(|id| !id.is_empty()) else {
                    warn!(
                        "Skipping game without id in {} ({})",
                        path.display(),
                        game.title.as_deref().unwrap_or("untitled")
                    );
                    continue;
                };
                if !seen_ids.insert(game_id.clone()) {
                    continue;
                }
                entries.push(CatalogEntry {
                    display_name: game.title.unwrap_or_else(|| game_id.clone()),
                    entity_id: game_id,
                    group_key: group.key.clone(),
                    asset_url: game.thumbnail_url.unwrap_or_default(),
                });
            }
        }
        Ok(CatalogPage {
            entries,
            is_complete,
        })
    }
}
