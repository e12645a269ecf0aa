//! Source document access.
//!
//! A render worker needs the source document as a local file because the
//! external tools only read from disk. A source already on the local
//! filesystem is used in place; a source in the object store is downloaded
//! into the cache's scratch directory first. The scratch copy disappears
//! when the job's handle is dropped, success or failure alike.

use crate::error::{ErrorKind, Result};
use shelf_cache::ArtifactStore;
use shelf_storage::StoreHandle;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where a source document lives.
#[derive(Clone)]
pub enum Source {
    /// A file on the local filesystem, used in place.
    Local(PathBuf),
    /// An object fetched from the remote store before rendering.
    Remote { store: StoreHandle, key: String },
}

impl Source {
    /// Produce a local path for the document, downloading if necessary.
    pub async fn materialize(&self, cache: &ArtifactStore) -> Result<Materialized> {
        match self {
            Self::Local(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Document(format!("no such file: {}", path.display())));
                }
                Ok(Materialized::InPlace(path.clone()))
            },
            Self::Remote { store, key } => {
                let scratch = cache.scratch_file().map_err(|_| exn::Exn::from(ErrorKind::Cache))?;
                let mut read = store.get_range(key, None).await.map_err(|err| {
                    tracing::warn!(store = store.name(), key, error = %err, "source download failed");
                    exn::Exn::from(ErrorKind::Storage)
                })?;
                let mut file = tokio::fs::File::create(scratch.path()).await.map_err(ErrorKind::from)?;
                tokio::io::copy(&mut read.reader, &mut file).await.map_err(ErrorKind::from)?;
                tokio::io::AsyncWriteExt::flush(&mut file).await.map_err(ErrorKind::from)?;
                Ok(Materialized::Downloaded(scratch))
            },
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => f.debug_tuple("Local").field(path).finish(),
            Self::Remote { store, key } => {
                f.debug_struct("Remote").field("store", &store.name()).field("key", key).finish()
            },
        }
    }
}

/// A readable local copy of the source. Dropping a downloaded copy deletes
/// it from scratch.
#[derive(Debug)]
pub enum Materialized {
    InPlace(PathBuf),
    Downloaded(NamedTempFile),
}

impl Materialized {
    pub fn path(&self) -> &Path {
        match self {
            Self::InPlace(path) => path,
            Self::Downloaded(file) => file.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_storage::backend::MemoryStore;
    use std::sync::Arc;

    fn cache_in(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir.join("cache"), dir.join("tmp")).unwrap()
    }

    #[tokio::test]
    async fn test_local_source_used_in_place() {
        let temp = tempfile::tempdir().unwrap();
        let cache = cache_in(temp.path());
        let doc = temp.path().join("issue.pdf");
        std::fs::write(&doc, b"%PDF-1.7").unwrap();
        let materialized = Source::Local(doc.clone()).materialize(&cache).await.unwrap();
        assert_eq!(materialized.path(), doc);
    }

    #[tokio::test]
    async fn test_local_source_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let cache = cache_in(temp.path());
        let err = Source::Local(temp.path().join("ghost.pdf")).materialize(&cache).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Document(_)));
    }

    #[tokio::test]
    async fn test_remote_source_downloads_to_scratch() {
        let temp = tempfile::tempdir().unwrap();
        let cache = cache_in(temp.path());
        let store: StoreHandle = Arc::new(MemoryStore::with_objects([("magazine/issue.pdf", b"%PDF-1.7 body".to_vec())]));
        let source = Source::Remote { store, key: "magazine/issue.pdf".to_string() };
        let materialized = source.materialize(&cache).await.unwrap();
        assert!(materialized.path().starts_with(cache.scratch_dir()));
        assert_eq!(std::fs::read(materialized.path()).unwrap(), b"%PDF-1.7 body");
        let downloaded = materialized.path().to_path_buf();
        drop(materialized);
        assert!(!downloaded.exists());
    }

    #[tokio::test]
    async fn test_remote_source_missing_object() {
        let temp = tempfile::tempdir().unwrap();
        let cache = cache_in(temp.path());
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let source = Source::Remote { store, key: "magazine/ghost.pdf".to_string() };
        let err = source.materialize(&cache).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
    }
}
