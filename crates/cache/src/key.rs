//! Cache key derivation.
//!
//! A cache key names one source item's derived artifacts on disk. It is
//! recomputed on demand from `(source_path, title)` — never persisted — so
//! it must be cheap (no file I/O) and perfectly deterministic.
//!
//! The key has two halves: a BLAKE3 hash of the source *path* (not the file
//! bytes, which keeps derivation stable and free even when the source lives
//! in the object store) truncated to 8 hex characters, and a sanitized slug
//! of the title so a human browsing the cache directory can tell which file
//! belongs to what without decoding hashes.

use std::path::Path;

/// How many hex characters of the path hash to keep. Eight gives 32 bits:
/// ample against accidental collision for a personal-scale catalog.
const HASH_PREFIX_LEN: usize = 8;
/// Maximum length of the sanitized title slug, in characters.
const SLUG_MAX_CHARS: usize = 50;

/// A short deterministic token identifying one source item's artifacts.
///
/// # Examples
///
/// ```
/// use shelf_cache::CacheKey;
///
/// let key = CacheKey::derive("/library/magazines/issue-042.pdf", "Monthly Review #42");
/// let again = CacheKey::derive("/library/magazines/issue-042.pdf", "Monthly Review #42");
/// assert_eq!(key, again);
/// assert!(key.as_str().starts_with("monthly_review_42_"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `(source_path, title)`.
    ///
    /// Pure and deterministic; identical inputs always yield the identical
    /// key, and distinct source paths yield distinct keys with overwhelming
    /// probability. An empty title falls back to the path's file stem.
    pub fn derive(source_path: &str, title: &str) -> Self {
        let hash = blake3::hash(source_path.as_bytes()).to_hex();
        let prefix = &hash.as_str()[..HASH_PREFIX_LEN];
        let title = match title.trim().is_empty() {
            false => title,
            true => Path::new(source_path).file_stem().and_then(|stem| stem.to_str()).unwrap_or("untitled"),
        };
        let slug = slugify(title);
        match slug.is_empty() {
            true => Self(format!("item_{prefix}")),
            false => Self(format!("{slug}_{prefix}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Naming strategy for locating an item's artifacts on disk.
///
/// Caches populated before content-addressed keys existed are named by raw
/// catalog id. Both namings stay readable; completeness checks compare the
/// two and prefer whichever scheme has better coverage, so an old cache is
/// not silently discarded and re-rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScheme {
    /// Content-addressed naming: `{slug}_{hash8}`.
    Current(CacheKey),
    /// Pre-migration naming keyed by raw catalog id.
    Legacy(i64),
}

impl KeyScheme {
    /// The filename stem this scheme produces.
    pub fn stem(&self) -> String {
        match self {
            Self::Current(key) => key.as_str().to_string(),
            Self::Legacy(id) => id.to_string(),
        }
    }
}

/// Lower-case, keep `[a-z0-9]` and CJK ideographs, fold every other
/// character into `_`, collapse runs, trim, truncate.
fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut previous_was_gap = true;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if slug.chars().count() >= SLUG_MAX_CHARS {
            break;
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || is_cjk(ch) {
            slug.push(ch);
            previous_was_gap = false;
        } else if !previous_was_gap {
            slug.push('_');
            previous_was_gap = true;
        }
    }
    slug.trim_matches('_').to_string()
}

/// CJK Unified Ideographs plus Extension A. Titles in the catalog are
/// frequently East Asian; stripping those to underscores would leave
/// nothing identifiable in the filename.
fn is_cjk(ch: char) -> bool {
    matches!(ch, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}
