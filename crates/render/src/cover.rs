//! Cover extraction for packaged ebooks.
//!
//! EPUB files declare their cover in several competing ways, and real-world
//! files use any or none of them. Candidate selection is a fixed fallback
//! order over an owned snapshot of the package manifest, so each tier can
//! be exercised without a real archive. A book with no locatable cover is a
//! normal outcome, not a failure.

use crate::error::{ErrorKind, Result};
use crate::source::Source;
use epub::doc::EpubDoc;
use shelf_cache::{ArtifactRole, ArtifactStore, CacheKey, KeyScheme};
use std::io::{Read, Seek};

/// Upper bound on candidates tried per document. Pathological manifests
/// (thousands of images named "cover-*") stop here.
const MAX_CANDIDATES: usize = 16;

/// Cover images are stored as the single unit 0 of the cover role.
const COVER_UNIT: u32 = 0;

/// Which manifest signal produced a candidate, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverTier {
    /// The package metadata names a cover entry outright.
    MetadataPointer,
    /// A manifest id containing "cover" with an image media type.
    CoverishId,
    /// The conventional `cover-image` manifest entry.
    FlaggedEntry,
    /// Any image resource whose file name contains "cover".
    NameSearch,
}

/// What a cover job did for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverOutcome {
    /// A cover was already cached under one of the naming schemes.
    Skipped,
    /// A cover image was extracted and cached.
    Extracted { tier: CoverTier },
    /// The package declares no locatable cover. Not an error.
    NoCover,
}

/// Owned snapshot of the parts of an EPUB package manifest that cover
/// selection looks at.
#[derive(Debug, Clone, Default)]
pub struct PackageManifest {
    /// Manifest id the package metadata points at, when declared.
    pub cover_id: Option<String>,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

impl ManifestEntry {
    fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    fn file_name(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or(&self.href)
    }
}

/// Ensure the item's cover image is cached, extracting it if needed.
pub async fn extract_cover(
    store: &ArtifactStore,
    source: &Source,
    key: &CacheKey,
    legacy_id: i64,
) -> Result<CoverOutcome> {
    let current = KeyScheme::Current(key.clone());
    let legacy = KeyScheme::Legacy(legacy_id);
    if store.has(&current, ArtifactRole::Cover, COVER_UNIT).await
        || store.has(&legacy, ArtifactRole::Cover, COVER_UNIT).await
    {
        tracing::debug!(key = %key, "cover already cached");
        return Ok(CoverOutcome::Skipped);
    }

    let document = source.materialize(store).await?;
    let mut doc = EpubDoc::new(document.path())
        .map_err(|err| exn::Exn::from(ErrorKind::Document(err.to_string())))?;
    let manifest = snapshot_manifest(&doc);

    for (tier, id) in cover_candidates(&manifest) {
        let Some((bytes, _mime)) = doc.get_resource(&id) else {
            tracing::debug!(key = %key, id, ?tier, "cover candidate unreadable, trying next");
            continue;
        };
        if bytes.is_empty() {
            continue;
        }
        store
            .write(&current, ArtifactRole::Cover, COVER_UNIT, &bytes)
            .await
            .map_err(|_| exn::Exn::from(ErrorKind::Cache))?;
        tracing::info!(key = %key, id, ?tier, size = bytes.len(), "extracted cover");
        return Ok(CoverOutcome::Extracted { tier });
    }
    tracing::info!(key = %key, "no locatable cover in package");
    Ok(CoverOutcome::NoCover)
}

fn snapshot_manifest<R: Read + Seek>(doc: &EpubDoc<R>) -> PackageManifest {
    let mut entries: Vec<ManifestEntry> = doc
        .resources
        .iter()
        .map(|(id, item)| ManifestEntry {
            id: id.clone(),
            href: item.path.to_string_lossy().into_owned(),
            media_type: item.mime.clone(),
        })
        .collect();
    // The archive's map has no stable order; candidates must be.
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    PackageManifest { cover_id: doc.get_cover_id(), entries }
}

/// The ordered, deduplicated candidate list for one manifest.
///
/// Earlier tiers are stronger signals; within a tier, entries keep manifest
/// id order. An id is only tried once even when several tiers match it.
pub fn cover_candidates(manifest: &PackageManifest) -> Vec<(CoverTier, String)> {
    let mut candidates: Vec<(CoverTier, String)> = Vec::new();
    let mut push = |candidates: &mut Vec<(CoverTier, String)>, tier: CoverTier, id: &str| {
        if candidates.len() < MAX_CANDIDATES && !candidates.iter().any(|(_, seen)| seen == id) {
            candidates.push((tier, id.to_string()));
        }
    };

    if let Some(id) = &manifest.cover_id {
        push(&mut candidates, CoverTier::MetadataPointer, id);
    }
    for entry in &manifest.entries {
        if entry.is_image() && entry.id.to_lowercase().contains("cover") {
            push(&mut candidates, CoverTier::CoverishId, &entry.id);
        }
    }
    for entry in &manifest.entries {
        if entry.id == "cover-image" {
            push(&mut candidates, CoverTier::FlaggedEntry, &entry.id);
        }
    }
    for entry in &manifest.entries {
        if entry.is_image() && entry.file_name().to_lowercase().contains("cover") {
            push(&mut candidates, CoverTier::NameSearch, &entry.id);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn entry(id: &str, href: &str, media_type: &str) -> ManifestEntry {
        ManifestEntry { id: id.to_string(), href: href.to_string(), media_type: media_type.to_string() }
    }

    #[test]
    fn test_metadata_pointer_wins() {
        let manifest = PackageManifest {
            cover_id: Some("img-007".to_string()),
            entries: vec![
                entry("cover-image", "images/front.jpg", "image/jpeg"),
                entry("img-007", "images/photo.jpg", "image/jpeg"),
            ],
        };
        let candidates = cover_candidates(&manifest);
        assert_eq!(candidates[0], (CoverTier::MetadataPointer, "img-007".to_string()));
    }

    #[test]
    fn test_coverish_id_requires_image_media_type() {
        let manifest = PackageManifest {
            cover_id: None,
            entries: vec![
                entry("cover-page", "text/cover.xhtml", "application/xhtml+xml"),
                entry("cover-img", "images/c.png", "image/png"),
            ],
        };
        let candidates = cover_candidates(&manifest);
        assert_eq!(candidates.first(), Some(&(CoverTier::CoverishId, "cover-img".to_string())));
        assert!(!candidates.iter().any(|(_, id)| id == "cover-page"));
    }

    #[test]
    fn test_flagged_entry_tier() {
        // "cover-image" with a non-image media type still surfaces via the
        // flagged tier, after any coverish image ids.
        let manifest = PackageManifest {
            cover_id: None,
            entries: vec![entry("cover-image", "weird.bin", "application/octet-stream")],
        };
        let candidates = cover_candidates(&manifest);
        assert_eq!(candidates, vec![(CoverTier::FlaggedEntry, "cover-image".to_string())]);
    }

    #[test]
    fn test_name_search_is_last_resort() {
        let manifest = PackageManifest {
            cover_id: None,
            entries: vec![
                entry("img-1", "images/spread.jpg", "image/jpeg"),
                entry("img-2", "images/front-cover.jpg", "image/jpeg"),
            ],
        };
        let candidates = cover_candidates(&manifest);
        assert_eq!(candidates, vec![(CoverTier::NameSearch, "img-2".to_string())]);
    }

    #[test]
    fn test_candidates_deduplicated_across_tiers() {
        let manifest = PackageManifest {
            cover_id: Some("cover-image".to_string()),
            entries: vec![entry("cover-image", "images/cover.jpg", "image/jpeg")],
        };
        let candidates = cover_candidates(&manifest);
        // One id, first tier only, despite matching all four.
        assert_eq!(candidates, vec![(CoverTier::MetadataPointer, "cover-image".to_string())]);
    }

    #[test]
    fn test_candidate_list_is_bounded() {
        let entries = (0..100)
            .map(|i| entry(&format!("cover-{i}"), &format!("images/cover-{i}.jpg"), "image/jpeg"))
            .collect();
        let manifest = PackageManifest { cover_id: None, entries };
        assert_eq!(cover_candidates(&manifest).len(), MAX_CANDIDATES);
    }

    #[test]
    fn test_no_signals_no_candidates() {
        let manifest = PackageManifest {
            cover_id: None,
            entries: vec![entry("ch1", "text/ch1.xhtml", "application/xhtml+xml")],
        };
        assert!(cover_candidates(&manifest).is_empty());
    }

    fn store_in(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir.join("cache"), dir.join("tmp")).unwrap()
    }

    #[tokio::test]
    async fn test_cached_cover_short_circuits() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let key = CacheKey::derive("/library/novel.epub", "A Novel");
        store.write(&KeyScheme::Current(key.clone()), ArtifactRole::Cover, 0, b"jpeg").await.unwrap();
        // The source does not even exist: a cached cover must short-circuit
        // before the document is touched.
        let source = Source::Local(temp.path().join("ghost.epub"));
        let outcome = extract_cover(&store, &source, &key, 7).await.unwrap();
        assert_eq!(outcome, CoverOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_cached_legacy_cover_short_circuits() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let key = CacheKey::derive("/library/novel.epub", "A Novel");
        store.write(&KeyScheme::Legacy(7), ArtifactRole::Cover, 0, b"jpeg").await.unwrap();
        let source = Source::Local(temp.path().join("ghost.epub"));
        let outcome = extract_cover(&store, &source, &key, 7).await.unwrap();
        assert_eq!(outcome, CoverOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_invalid_package_is_document_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let key = CacheKey::derive("/library/novel.epub", "A Novel");
        let doc = temp.path().join("novel.epub");
        std::fs::write(&doc, b"this is not a zip archive").unwrap();
        let err = extract_cover(&store, &Source::Local(doc), &key, 7).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Document(_)));
    }
}
