//! End-to-end preprocessing scenarios: filesystem catalog, scheduler,
//! render worker, and artifact cache wired together, with only the external
//! rendering tool faked.

use async_trait::async_trait;
use shelf::{FsCatalog, RenderWorker};
use shelf_cache::{ArtifactRole, ArtifactStore, CacheKey, KeyScheme};
use shelf_preprocess::{Catalog, ItemType, Progress, Scheduler};
use shelf_render::{DocumentRenderer, PageRenderer, error::ErrorKind, error::Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Stands in for pdftoppm/pdfinfo: reports a fixed page count and writes
/// zero-padded page images the way the real tool does for 10+ page files.
struct FakeTool {
    pages: u32,
}

#[async_trait]
impl DocumentRenderer for FakeTool {
    async fn page_count(&self, _document: &Path) -> Result<u32> {
        Ok(self.pages)
    }

    async fn render_all(&self, _document: &Path, out_dir: &Path, out_stem: &str) -> Result<()> {
        for page in 1..=self.pages {
            tokio::fs::write(out_dir.join(format!("{out_stem}-{page:02}.png")), format!("page {page}"))
                .await
                .map_err(ErrorKind::from)?;
        }
        Ok(())
    }

    async fn render_page(&self, _document: &Path, out_dir: &Path, out_stem: &str, page: u32) -> Result<()> {
        tokio::fs::write(out_dir.join(format!("{out_stem}-{page:02}.png")), format!("page {page}"))
            .await
            .map_err(ErrorKind::from)?;
        Ok(())
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    magazine_root: PathBuf,
    scheduler: Scheduler,
}

fn fixture(pages: u32) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let library = temp.path().join("library");
    std::fs::create_dir_all(&library).unwrap();
    std::fs::write(library.join("issue-042.pdf"), b"%PDF-1.7").unwrap();

    let cache_root = temp.path().join("cache");
    let magazine_cache = ArtifactStore::new(cache_root.join("magazine"), cache_root.join("tmp/magazine")).unwrap();
    let ebook_cache = ArtifactStore::new(cache_root.join("ebook"), cache_root.join("tmp/ebook")).unwrap();
    let magazine_root = magazine_cache.root_dir().to_path_buf();

    let catalog = Arc::new(FsCatalog::new(&library));
    let renderer = PageRenderer::with_tool(Arc::new(FakeTool { pages }));
    let worker = RenderWorker::new(magazine_cache, ebook_cache, None, library, Some(renderer));
    let scheduler = Scheduler::with_item_delay(catalog as Arc<dyn Catalog>, Arc::new(worker), Duration::ZERO);

    Fixture { _temp: temp, magazine_root, scheduler }
}

async fn run_to_completion(scheduler: &Scheduler, item_type: ItemType) -> Progress {
    let mut rx = scheduler.subscribe(item_type).await.unwrap();
    rx.wait_for(|progress| !progress.running).await.unwrap().clone()
}

fn page_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_fresh_magazine_renders_every_page() {
    let fix = fixture(12);
    let total = fix.scheduler.start(ItemType::Magazine, false).await.unwrap();
    assert_eq!(total, 1);

    let progress = run_to_completion(&fix.scheduler, ItemType::Magazine).await;
    assert_eq!(progress.processed, 1);
    assert_eq!(progress.success, 1);
    assert_eq!(progress.failed, 0);

    let files = page_files(&fix.magazine_root);
    assert_eq!(files.len(), 12);
    for name in &files {
        // FsCatalog titles the item "issue 042"; the key prefixes its slug.
        assert!(name.starts_with("issue_042_"), "unexpected file name {name}");
        assert!(name.contains("_page_"), "unexpected file name {name}");
        assert!(name.ends_with(".png"), "unexpected file name {name}");
    }
}

#[tokio::test]
async fn test_complete_legacy_cache_is_skipped_and_untouched() {
    let fix = fixture(12);
    // A cache populated before content-addressed keys: named by catalog id.
    // FsCatalog assigns id 1 to the only magazine.
    for page in 1..=12 {
        std::fs::write(fix.magazine_root.join(format!("1_page_{page}.png")), format!("legacy page {page}")).unwrap();
    }
    let before = page_files(&fix.magazine_root);

    fix.scheduler.start(ItemType::Magazine, false).await.unwrap();
    let progress = run_to_completion(&fix.scheduler, ItemType::Magazine).await;
    assert_eq!(progress.skipped, 1);
    assert_eq!(progress.success, 0);
    assert_eq!(progress.failed, 0);

    let after = page_files(&fix.magazine_root);
    assert_eq!(before, after, "no new files may appear");
    for page in 1..=12 {
        let content = std::fs::read(fix.magazine_root.join(format!("1_page_{page}.png"))).unwrap();
        assert_eq!(content, format!("legacy page {page}").into_bytes());
    }
}

#[tokio::test]
async fn test_partial_set_resumes_without_rewriting() {
    let fix = fixture(10);
    // Pre-seed pages 1..=7 under the same key the worker will derive for
    // the item (relative source path, humanised title).
    let scheme = KeyScheme::Current(CacheKey::derive("issue-042.pdf", "issue 042"));
    let seed = ArtifactStore::new(
        fix.magazine_root.clone(),
        fix.magazine_root.parent().unwrap().join("tmp/seed"),
    )
    .unwrap();
    for page in 1..=7 {
        seed.write(&scheme, ArtifactRole::Page, page, format!("original {page}").as_bytes()).await.unwrap();
    }

    fix.scheduler.start(ItemType::Magazine, false).await.unwrap();
    let progress = run_to_completion(&fix.scheduler, ItemType::Magazine).await;
    assert_eq!(progress.success, 1);
    assert_eq!(progress.failed, 0);

    assert_eq!(page_files(&fix.magazine_root).len(), 10);
    for page in 1..=7 {
        let path = seed.unit_path(&scheme, ArtifactRole::Page, page);
        assert_eq!(
            std::fs::read(path).unwrap(),
            format!("original {page}").into_bytes(),
            "page {page} must be untouched"
        );
    }
}
