//! Item processing: the bridge between the scheduler and the renderers.
//!
//! One worker instance serves every item type. Magazines get their pages
//! rendered, ebooks get their cover extracted; both resolve the source the
//! same way (a file under the library root when present, otherwise the
//! object store) and both short-circuit on an already-complete cache.

use shelf_cache::{ArtifactStore, CacheKey};
use shelf_preprocess::error::{ErrorKind, Result};
use shelf_preprocess::{ItemType, SourceItem, WorkOutcome, Worker};
use shelf_render::{CoverOutcome, PageOutcome, PageRenderer, Source, extract_cover};
use shelf_storage::StoreHandle;
use std::path::PathBuf;

pub struct RenderWorker {
    magazine_cache: ArtifactStore,
    ebook_cache: ArtifactStore,
    store: Option<StoreHandle>,
    library_root: PathBuf,
    /// Absent when the poppler utilities were not found at startup; ebook
    /// covers still work, magazine items fail individually.
    pages: Option<PageRenderer>,
}

impl RenderWorker {
    pub fn new(
        magazine_cache: ArtifactStore,
        ebook_cache: ArtifactStore,
        store: Option<StoreHandle>,
        library_root: PathBuf,
        pages: Option<PageRenderer>,
    ) -> Self {
        Self { magazine_cache, ebook_cache, store, library_root, pages }
    }

    pub fn cache_for(&self, item_type: ItemType) -> &ArtifactStore {
        match item_type {
            ItemType::Magazine => &self.magazine_cache,
            ItemType::Ebook => &self.ebook_cache,
        }
    }

    /// Local library file when present, otherwise the object store under
    /// the same relative key.
    fn source_for(&self, item: &SourceItem) -> Result<Source> {
        let local = self.library_root.join(&item.source_path);
        if local.is_file() {
            return Ok(Source::Local(local));
        }
        match &self.store {
            Some(store) => Ok(Source::Remote { store: store.clone(), key: item.source_path.clone() }),
            None => exn::bail!(ErrorKind::Worker(format!("source not found: {}", item.source_path))),
        }
    }
}

impl RenderWorker {
    async fn process_inner(&self, item_type: ItemType, item: &SourceItem) -> Result<WorkOutcome> {
        let key = CacheKey::derive(&item.source_path, &item.title);
        let source = self.source_for(item)?;
        let cache = self.cache_for(item_type);
        let outcome = match item_type {
            ItemType::Magazine => {
                let Some(pages) = &self.pages else {
                    exn::bail!(ErrorKind::Worker(
                        "poppler utilities (pdftoppm/pdfinfo) not detected on your system".to_string()
                    ));
                };
                match pages
                    .render(cache, &source, &key, item.id)
                    .await
                    .map_err(|err| exn::Exn::from(ErrorKind::Worker(err.to_string())))?
                {
                    PageOutcome::Skipped { .. } => WorkOutcome::Skipped,
                    PageOutcome::Rendered { adopted, .. } => WorkOutcome::Done { units: adopted },
                }
            },
            ItemType::Ebook => {
                match extract_cover(cache, &source, &key, item.id)
                    .await
                    .map_err(|err| exn::Exn::from(ErrorKind::Worker(err.to_string())))?
                {
                    CoverOutcome::Skipped => WorkOutcome::Skipped,
                    CoverOutcome::Extracted { .. } => WorkOutcome::Done { units: 1 },
                    // A book with no cover is processed, with nothing to cache.
                    CoverOutcome::NoCover => WorkOutcome::Done { units: 0 },
                }
            },
        };
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl Worker for RenderWorker {
    async fn process(&self, item_type: ItemType, item: &SourceItem) -> Result<WorkOutcome> {
        let outcome = self.process_inner(item_type, item).await;
        // Scratch is swept on failure too; a dead tool invocation must not
        // leave half-rendered output behind.
        self.cache_for(item_type).sweep_scratch().await;
        outcome
    }
}
