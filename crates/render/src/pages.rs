//! Page rendering for paginated documents.
//!
//! The external tool renders into the scratch directory, then each page
//! image is renamed into its cache slot. The preprocessing path renders the
//! whole document in one invocation (one process spawn, resumes at item
//! granularity); on-demand requests render a single target page instead.

use crate::error::{ErrorKind, Result};
use crate::source::Source;
use crate::tool::Poppler;
use async_trait::async_trait;
use shelf_cache::{ArtifactRole, ArtifactStore, CacheKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Abstraction over the external rendering tool.
///
/// One implementation shells out to poppler; tests substitute a fake that
/// writes files directly.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, document: &Path) -> Result<u32>;

    /// Render every page into `out_dir` as `{out_stem}-{n}.png`.
    ///
    /// Page numbers in the filenames may be zero-padded; callers probe the
    /// known pattern variants when collecting output.
    async fn render_all(&self, document: &Path, out_dir: &Path, out_stem: &str) -> Result<()>;

    /// Render exactly one page, named like [`render_all`](Self::render_all)
    /// output for that page.
    async fn render_page(&self, document: &Path, out_dir: &Path, out_stem: &str, page: u32) -> Result<()>;
}

/// What a render job did for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The artifact set was already complete; no tool was run.
    Skipped { pages: u32 },
    /// Pages were rendered and the missing units filled in.
    Rendered { pages: u32, adopted: u32 },
}

/// Renders page images for one document into an [`ArtifactStore`].
pub struct PageRenderer {
    tool: Arc<dyn DocumentRenderer>,
}

impl PageRenderer {
    /// Locate the poppler utilities on this system.
    pub fn discover() -> Result<Self> {
        Ok(Self::with_tool(Arc::new(Poppler::discover()?)))
    }

    pub fn with_tool(tool: Arc<dyn DocumentRenderer>) -> Self {
        Self { tool }
    }

    /// Ensure every page of `source` has a cached image.
    ///
    /// Completeness is re-checked against the expected page count before any
    /// rendering, so an item whose cache is already whole (under either
    /// naming scheme) is skipped, and a partially cached item only adopts
    /// its missing units.
    pub async fn render(
        &self,
        store: &ArtifactStore,
        source: &Source,
        key: &CacheKey,
        legacy_id: i64,
    ) -> Result<PageOutcome> {
        let document = source.materialize(store).await?;
        let pages = self.tool.page_count(document.path()).await?;

        let resolution = store.resolve(key, legacy_id, ArtifactRole::Page, pages).await;
        if resolution.coverage.is_complete() {
            tracing::debug!(key = %key, pages, "page set already complete");
            return Ok(PageOutcome::Skipped { pages });
        }

        let stem = resolution.scheme.stem();
        self.tool.render_all(document.path(), store.scratch_dir(), &stem).await?;

        let mut adopted = 0;
        for page in 1..=pages {
            if store.has(&resolution.scheme, ArtifactRole::Page, page).await {
                continue;
            }
            let Some(output) = find_output(store.scratch_dir(), &stem, page, pages).await else {
                exn::bail!(ErrorKind::OutputMissing(page));
            };
            store
                .adopt(&output, &resolution.scheme, ArtifactRole::Page, page)
                .await
                .map_err(|_| exn::Exn::from(ErrorKind::Cache))?;
            adopted += 1;
        }
        tracing::info!(key = %key, pages, adopted, "rendered page set");
        Ok(PageOutcome::Rendered { pages, adopted })
    }

    /// Ensure one specific page of `source` has a cached image, rendering
    /// just that page when it is missing.
    ///
    /// Serves on-demand requests for a single page without paying for the
    /// whole document; the preprocessing path uses [`render`](Self::render)
    /// instead.
    pub async fn render_page(
        &self,
        store: &ArtifactStore,
        source: &Source,
        key: &CacheKey,
        legacy_id: i64,
        page: u32,
    ) -> Result<PageOutcome> {
        let document = source.materialize(store).await?;
        let pages = self.tool.page_count(document.path()).await?;
        if page == 0 || page > pages {
            exn::bail!(ErrorKind::Document(format!("page {page} out of range 1..={pages}")));
        }

        let resolution = store.resolve(key, legacy_id, ArtifactRole::Page, pages).await;
        if store.has(&resolution.scheme, ArtifactRole::Page, page).await {
            tracing::debug!(key = %key, page, "page already cached");
            return Ok(PageOutcome::Skipped { pages });
        }

        let stem = resolution.scheme.stem();
        self.tool.render_page(document.path(), store.scratch_dir(), &stem, page).await?;
        let Some(output) = find_output(store.scratch_dir(), &stem, page, pages).await else {
            exn::bail!(ErrorKind::OutputMissing(page));
        };
        store
            .adopt(&output, &resolution.scheme, ArtifactRole::Page, page)
            .await
            .map_err(|_| exn::Exn::from(ErrorKind::Cache))?;
        tracing::info!(key = %key, page, "rendered single page");
        Ok(PageOutcome::Rendered { pages, adopted: 1 })
    }
}

/// Filenames a tool may have produced for one page. pdftoppm zero-pads the
/// page number to the width of the final page number, so page 3 of a
/// 12-page document is `doc-03.png` and page 3 of 1000 is `doc-0003.png`;
/// older builds emit the unpadded form regardless.
fn output_candidates(stem: &str, page: u32, last_page: u32) -> Vec<String> {
    let width = last_page.to_string().len();
    let mut names = vec![format!("{stem}-{page}.png")];
    let padded = format!("{stem}-{page:0width$}.png");
    if !names.contains(&padded) {
        names.push(padded);
    }
    names
}

async fn find_output(dir: &Path, stem: &str, page: u32, last_page: u32) -> Option<PathBuf> {
    for name in output_candidates(stem, page, last_page) {
        let candidate = dir.join(name);
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_cache::KeyScheme;

    /// Writes page files directly instead of shelling out.
    struct FakeTool {
        pages: u32,
        /// Zero-pad width for page numbers in output names, as pdftoppm does
        /// for longer documents.
        pad: usize,
        /// Page numbers to silently not produce output for.
        drop_pages: Vec<u32>,
    }

    impl FakeTool {
        fn new(pages: u32) -> Self {
            Self { pages, pad: 1, drop_pages: Vec::new() }
        }
    }

    #[async_trait]
    impl DocumentRenderer for FakeTool {
        async fn page_count(&self, _document: &Path) -> Result<u32> {
            Ok(self.pages)
        }

        async fn render_all(&self, _document: &Path, out_dir: &Path, out_stem: &str) -> Result<()> {
            for page in 1..=self.pages {
                if self.drop_pages.contains(&page) {
                    continue;
                }
                let name = format!("{out_stem}-{page:0width$}.png", width = self.pad);
                tokio::fs::write(out_dir.join(name), format!("page {page}")).await.map_err(ErrorKind::from)?;
            }
            Ok(())
        }

        async fn render_page(&self, _document: &Path, out_dir: &Path, out_stem: &str, page: u32) -> Result<()> {
            if self.drop_pages.contains(&page) {
                return Ok(());
            }
            let name = format!("{out_stem}-{page:0width$}.png", width = self.pad);
            tokio::fs::write(out_dir.join(name), format!("page {page}")).await.map_err(ErrorKind::from)?;
            Ok(())
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        store: ArtifactStore,
        source: Source,
        key: CacheKey,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(temp.path().join("cache"), temp.path().join("tmp")).unwrap();
        let doc = temp.path().join("issue.pdf");
        std::fs::write(&doc, b"%PDF-1.7").unwrap();
        let key = CacheKey::derive("/library/issue.pdf", "Issue 42");
        Fixture { _temp: temp, store, source: Source::Local(doc), key }
    }

    #[tokio::test]
    async fn test_renders_full_document() {
        let fix = fixture();
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(3)));
        let outcome = renderer.render(&fix.store, &fix.source, &fix.key, 7).await.unwrap();
        assert_eq!(outcome, PageOutcome::Rendered { pages: 3, adopted: 3 });
        let scheme = KeyScheme::Current(fix.key.clone());
        let coverage = fix.store.completeness(&scheme, ArtifactRole::Page, 3).await;
        assert!(coverage.is_complete());
    }

    #[tokio::test]
    async fn test_skips_complete_set() {
        let fix = fixture();
        let scheme = KeyScheme::Current(fix.key.clone());
        for page in 1..=3 {
            fix.store.write(&scheme, ArtifactRole::Page, page, b"cached").await.unwrap();
        }
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(3)));
        let outcome = renderer.render(&fix.store, &fix.source, &fix.key, 7).await.unwrap();
        assert_eq!(outcome, PageOutcome::Skipped { pages: 3 });
    }

    #[tokio::test]
    async fn test_skips_complete_legacy_set() {
        let fix = fixture();
        let legacy = KeyScheme::Legacy(7);
        for page in 1..=3 {
            fix.store.write(&legacy, ArtifactRole::Page, page, b"cached").await.unwrap();
        }
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(3)));
        let outcome = renderer.render(&fix.store, &fix.source, &fix.key, 7).await.unwrap();
        assert_eq!(outcome, PageOutcome::Skipped { pages: 3 });
    }

    #[tokio::test]
    async fn test_resumes_partial_set() {
        let fix = fixture();
        let scheme = KeyScheme::Current(fix.key.clone());
        fix.store.write(&scheme, ArtifactRole::Page, 1, b"kept").await.unwrap();
        fix.store.write(&scheme, ArtifactRole::Page, 3, b"kept").await.unwrap();
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(4)));
        let outcome = renderer.render(&fix.store, &fix.source, &fix.key, 7).await.unwrap();
        assert_eq!(outcome, PageOutcome::Rendered { pages: 4, adopted: 2 });
        // Already-present units are untouched.
        let kept = fix.store.unit_path(&scheme, ArtifactRole::Page, 1);
        assert_eq!(std::fs::read(kept).unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_adopts_zero_padded_output() {
        let fix = fixture();
        let tool = FakeTool { pages: 12, pad: 2, drop_pages: Vec::new() };
        let renderer = PageRenderer::with_tool(Arc::new(tool));
        let outcome = renderer.render(&fix.store, &fix.source, &fix.key, 7).await.unwrap();
        assert_eq!(outcome, PageOutcome::Rendered { pages: 12, adopted: 12 });
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let fix = fixture();
        let tool = FakeTool { pages: 3, pad: 1, drop_pages: vec![2] };
        let renderer = PageRenderer::with_tool(Arc::new(tool));
        let err = renderer.render(&fix.store, &fix.source, &fix.key, 7).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::OutputMissing(2)));
    }

    #[tokio::test]
    async fn test_renders_one_page_on_demand() {
        let fix = fixture();
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(3)));
        let outcome = renderer.render_page(&fix.store, &fix.source, &fix.key, 7, 2).await.unwrap();
        assert_eq!(outcome, PageOutcome::Rendered { pages: 3, adopted: 1 });
        let scheme = KeyScheme::Current(fix.key.clone());
        assert!(fix.store.has(&scheme, ArtifactRole::Page, 2).await);
        // The other pages were not rendered.
        assert!(!fix.store.has(&scheme, ArtifactRole::Page, 1).await);
        assert!(!fix.store.has(&scheme, ArtifactRole::Page, 3).await);
    }

    #[tokio::test]
    async fn test_single_page_already_cached_is_skipped() {
        let fix = fixture();
        let scheme = KeyScheme::Current(fix.key.clone());
        fix.store.write(&scheme, ArtifactRole::Page, 2, b"cached").await.unwrap();
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(3)));
        let outcome = renderer.render_page(&fix.store, &fix.source, &fix.key, 7, 2).await.unwrap();
        assert_eq!(outcome, PageOutcome::Skipped { pages: 3 });
        let path = fix.store.unit_path(&scheme, ArtifactRole::Page, 2);
        assert_eq!(std::fs::read(path).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn test_single_page_out_of_range() {
        let fix = fixture();
        let renderer = PageRenderer::with_tool(Arc::new(FakeTool::new(3)));
        let err = renderer.render_page(&fix.store, &fix.source, &fix.key, 7, 4).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Document(_)));
        let err = renderer.render_page(&fix.store, &fix.source, &fix.key, 7, 0).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Document(_)));
    }

    #[tokio::test]
    async fn test_adopts_wide_padded_output() {
        // A 1000-page document pads to four digits; the single-page path
        // must still find the output.
        let fix = fixture();
        let tool = FakeTool { pages: 1000, pad: 4, drop_pages: Vec::new() };
        let renderer = PageRenderer::with_tool(Arc::new(tool));
        let outcome = renderer.render_page(&fix.store, &fix.source, &fix.key, 7, 3).await.unwrap();
        assert_eq!(outcome, PageOutcome::Rendered { pages: 1000, adopted: 1 });
        let scheme = KeyScheme::Current(fix.key.clone());
        assert!(fix.store.has(&scheme, ArtifactRole::Page, 3).await);
    }

    #[test]
    fn test_output_candidates() {
        assert_eq!(output_candidates("doc", 3, 9), ["doc-3.png"]);
        assert_eq!(output_candidates("doc", 3, 12), ["doc-3.png", "doc-03.png"]);
        assert_eq!(output_candidates("doc", 3, 120), ["doc-3.png", "doc-003.png"]);
        assert_eq!(output_candidates("doc", 3, 1000), ["doc-3.png", "doc-0003.png"]);
        assert_eq!(output_candidates("doc", 42, 42), ["doc-42.png"]);
    }
}
