//! Filesystem-backed catalog.
//!
//! The real catalog of a media library lives elsewhere; preprocessing only
//! talks to it through the `Catalog` trait. This implementation derives a
//! catalog from a library directory on disk: magazines are `.pdf` files,
//! ebooks are `.epub` files, ids come from the sorted scan order, and
//! artifact states live in memory for the lifetime of the process.

use shelf_preprocess::{ArtifactState, Catalog, ItemType, SourceItem};
use shelf_preprocess::error::{ErrorKind, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Directory nesting deeper than this is not scanned. A library tree is
/// shallow; a runaway symlink cycle is not.
const MAX_SCAN_DEPTH: usize = 8;

pub struct FsCatalog {
    library_root: PathBuf,
    states: Mutex<HashMap<(ItemType, i64), ArtifactState>>,
}

impl FsCatalog {
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self { library_root: library_root.into(), states: Mutex::new(HashMap::new()) }
    }

    fn extension_for(item_type: ItemType) -> &'static str {
        match item_type {
            ItemType::Magazine => "pdf",
            ItemType::Ebook => "epub",
        }
    }

    /// Walk the library and list matching files, sorted by relative path so
    /// ids are stable across scans of an unchanged tree.
    async fn scan(&self, item_type: ItemType) -> Result<Vec<(i64, String)>> {
        let extension = Self::extension_for(item_type);
        let mut found: Vec<String> = Vec::new();
        let mut worklist = vec![(self.library_root.clone(), 0usize)];
        while let Some((dir, depth)) = worklist.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|err| exn::Exn::from(ErrorKind::Catalog(format!("cannot read {}: {err}", dir.display()))))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| exn::Exn::from(ErrorKind::Catalog(err.to_string())))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| exn::Exn::from(ErrorKind::Catalog(err.to_string())))?;
                if file_type.is_dir() {
                    if depth + 1 < MAX_SCAN_DEPTH {
                        worklist.push((path, depth + 1));
                    }
                    continue;
                }
                if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&self.library_root) {
                    found.push(relative.to_string_lossy().into_owned());
                }
            }
        }
        found.sort();
        Ok(found.into_iter().zip(1i64..).map(|(path, id)| (id, path)).collect())
    }

    fn title_from(relative_path: &str) -> String {
        Path::new(relative_path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(relative_path)
            .replace(['_', '-'], " ")
    }
}

#[async_trait::async_trait]
impl Catalog for FsCatalog {
    async fn list_items_needing_artifacts(&self, item_type: ItemType, force: bool) -> Result<Vec<SourceItem>> {
        let scanned = self.scan(item_type).await?;
        let states = self.states.lock().await;
        Ok(scanned
            .into_iter()
            .map(|(id, source_path)| {
                let artifact_state = states.get(&(item_type, id)).copied().unwrap_or(ArtifactState::Absent);
                SourceItem { id, title: Self::title_from(&source_path), source_path, artifact_state }
            })
            .filter(|item| force || item.artifact_state != ArtifactState::Complete)
            .collect())
    }

    async fn mark_artifact_state(&self, item_type: ItemType, item_id: i64, state: ArtifactState) -> Result<()> {
        self.states.lock().await.insert((item_type, item_id), state);
        Ok(())
    }
}
