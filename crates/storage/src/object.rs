//! These types represent object metadata returned by the storage gateway
//! (for stat, listing, and ranged reads) and the multipart bookkeeping
//! shared between the uploader and the backends.

use time::OffsetDateTime;
use tokio::io::AsyncRead;

/// Object metadata returned by a HEAD-style probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// MIME type as reported by the store
    pub content_type: String,
    /// Last modified timestamp
    pub last_modified: OffsetDateTime,
}

/// One entry from a prefix listing. Used for migration/audit tooling,
/// not the hot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Key relative to the configured prefix
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub last_modified: OffsetDateTime,
}

/// A (possibly partial) object read.
///
/// `total_size` is always the size of the *whole* object, known up front,
/// even when only a byte range was requested — exactly what a range-serving
/// HTTP proxy needs for its `Content-Range` header.
pub struct ObjectRead {
    /// Byte source for the requested span.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Size of the full object in bytes.
    pub total_size: u64,
    /// MIME type as reported by the store.
    pub content_type: String,
}

impl std::fmt::Debug for ObjectRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRead")
            .field("total_size", &self.total_size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// A committed part of a multipart session, keyed by its ordinal.
///
/// The remote store hands back an opaque etag per uploaded part; the full
/// ordered list must be echoed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartEtag {
    pub part_number: u32,
    pub etag: String,
}
