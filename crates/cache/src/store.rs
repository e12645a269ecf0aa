//! Filesystem-backed store of derived artifacts.
//!
//! Artifacts (rendered page images, extracted covers) are plain files named
//! `{stem}_{role}_{unit}.{ext}` under the store root. Completeness of a
//! multi-unit set is always re-derived by scanning — never stored as a
//! separate flag — so a crash mid-render is recoverable by re-scanning.
//!
//! Writes are atomic with respect to readers: bytes land in a scratch file
//! on the same filesystem first and are renamed into place, so a concurrent
//! reader never observes a truncated unit.

use crate::error::{ErrorKind, Result};
use crate::key::{CacheKey, KeyScheme};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;

/// What kind of derived file a cache unit holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    /// A rendered page image; units are numbered from 1.
    Page,
    /// An extracted cover image; a single unit numbered 0.
    Cover,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Cover => "cover",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Page => "png",
            Self::Cover => "jpg",
        }
    }
}

impl std::str::FromStr for ArtifactRole {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "page" => Ok(Self::Page),
            "cover" => Ok(Self::Cover),
            _ => Err(()),
        }
    }
}

/// How much of an expected artifact set is present on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub done: u32,
    pub total: u32,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }
}

/// Outcome of resolving which naming scheme an item's artifacts live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub scheme: KeyScheme,
    pub coverage: Coverage,
}

/// One store instance manages one directory of artifacts (one item type)
/// plus a scratch directory for atomic-write temporaries and in-progress
/// downloads.
///
/// # Examples
///
/// ```no_run
/// use shelf_cache::{ArtifactRole, ArtifactStore, CacheKey, KeyScheme};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = ArtifactStore::new("/var/cache/shelf/magazine", "/var/cache/shelf/tmp")?;
/// let scheme = KeyScheme::Current(CacheKey::derive("/library/issue-042.pdf", "Issue 42"));
/// store.write(&scheme, ArtifactRole::Page, 1, b"\x89PNG...").await?;
/// assert!(store.has(&scheme, ArtifactRole::Page, 1).await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    scratch: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`, with `scratch` for temporaries.
    ///
    /// Both directories are created if missing. `scratch` must live on the
    /// same filesystem as `root` for the rename-into-place discipline to be
    /// atomic.
    pub fn new(root: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let scratch = scratch.into();
        for dir in [&root, &scratch] {
            if !dir.is_absolute() {
                exn::bail!(ErrorKind::InvalidRoot(dir.clone()));
            }
            if dir.exists() {
                if !dir.is_dir() {
                    exn::bail!(ErrorKind::InvalidRoot(dir.clone()));
                }
            } else {
                // Non-async: only happens once at startup.
                std::fs::create_dir_all(dir).map_err(ErrorKind::Io)?;
            }
        }
        Ok(Self { root, scratch })
    }

    /// Filesystem location of one unit. Pure derived naming; the file may or
    /// may not exist.
    pub fn unit_path(&self, scheme: &KeyScheme, role: ArtifactRole, unit_index: u32) -> PathBuf {
        self.root.join(format!("{}_{}_{}.{}", scheme.stem(), role.as_str(), unit_index, role.extension()))
    }

    /// Whether a readable, non-empty unit exists.
    ///
    /// A zero-length unit means a writer died before the rename discipline
    /// existed or the disk filled; either way it cannot be served, so it
    /// counts as absent and gets re-rendered.
    pub async fn has(&self, scheme: &KeyScheme, role: ArtifactRole, unit_index: u32) -> bool {
        let path = self.unit_path(scheme, role, unit_index);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => true,
            Ok(meta) if meta.is_file() => {
                tracing::warn!(path = %path.display(), "zero-length cache unit treated as absent");
                false
            },
            _ => false,
        }
    }

    /// Write one unit atomically: bytes land in scratch, then rename.
    ///
    /// Returns the final unit path.
    pub async fn write(&self, scheme: &KeyScheme, role: ArtifactRole, unit_index: u32, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.unit_path(scheme, role, unit_index);
        let tmp = NamedTempFile::new_in(&self.scratch).map_err(ErrorKind::Io)?;
        fs::write(tmp.path(), bytes).await.map_err(ErrorKind::Io)?;
        tmp.persist(&path).map_err(|e| ErrorKind::Io(e.error))?;
        Ok(path)
    }

    /// Promote an already-written scratch file into a unit slot by rename.
    ///
    /// Used by renderers whose external tool writes its own output files:
    /// the tool writes into scratch and each output is then moved into place
    /// without a copy.
    pub async fn adopt(&self, from: &Path, scheme: &KeyScheme, role: ArtifactRole, unit_index: u32) -> Result<PathBuf> {
        let path = self.unit_path(scheme, role, unit_index);
        fs::rename(from, &path).await.map_err(ErrorKind::Io)?;
        Ok(path)
    }

    /// Count present units in `[1, expected]`.
    ///
    /// Re-derived by scanning on every call; deciding whether render work is
    /// needed and resuming a partially rendered item are the same question.
    pub async fn completeness(&self, scheme: &KeyScheme, role: ArtifactRole, expected: u32) -> Coverage {
        let mut done = 0;
        for unit_index in 1..=expected {
            if self.has(scheme, role, unit_index).await {
                done += 1;
            }
        }
        Coverage { done, total: expected }
    }

    /// Decide which naming scheme this item's artifacts live under.
    ///
    /// Tries the content-addressed scheme first; if that set is incomplete,
    /// checks the legacy id-keyed scheme and prefers whichever has more
    /// coverage (ties go to the current scheme). The winning scheme is
    /// reported so callers can log the migration state.
    pub async fn resolve(
        &self,
        key: &CacheKey,
        legacy_id: i64,
        role: ArtifactRole,
        expected: u32,
    ) -> Resolution {
        let current = KeyScheme::Current(key.clone());
        let current_coverage = self.completeness(&current, role, expected).await;
        if current_coverage.is_complete() {
            return Resolution { scheme: current, coverage: current_coverage };
        }
        let legacy = KeyScheme::Legacy(legacy_id);
        let legacy_coverage = self.completeness(&legacy, role, expected).await;
        if legacy_coverage.done > current_coverage.done {
            tracing::debug!(legacy_id, done = legacy_coverage.done, total = legacy_coverage.total, "using legacy-named cache set");
            Resolution { scheme: legacy, coverage: legacy_coverage }
        } else {
            Resolution { scheme: current, coverage: current_coverage }
        }
    }

    /// Directory the artifacts live in.
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// Directory for in-progress downloads and atomic-write temporaries.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    /// Allocate a scratch file that disappears on drop.
    pub fn scratch_file(&self) -> Result<NamedTempFile> {
        Ok(NamedTempFile::new_in(&self.scratch).map_err(ErrorKind::Io)?)
    }

    /// Best-effort scratch sweep after a job. Files still open (held by a
    /// concurrent worker's `NamedTempFile`) survive on some platforms; that
    /// is fine, they are swept next time.
    pub async fn sweep_scratch(&self) {
        let Ok(mut entries) = fs::read_dir(&self.scratch).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Err(err) = fs::remove_file(entry.path()).await {
                tracing::debug!(path = %entry.path().display(), error = %err, "scratch sweep skipped a file");
            }
        }
    }
}
