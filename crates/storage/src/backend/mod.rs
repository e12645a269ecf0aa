//! Storage backend trait and implementations.
//!
//! This module defines the `ObjectStore` trait, which provides a uniform
//! interface over remote S3-compatible object stores (AWS S3, Backblaze B2,
//! MinIO, Tigris, ...). No caching logic lives here; the gateway only moves
//! bytes.

#[cfg(any(test, feature = "mock"))]
mod memory;
#[cfg(feature = "s3")]
mod s3;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryStore;
#[cfg(feature = "s3")]
pub use self::s3::S3Store;
use crate::error::Result;
use crate::object::{ObjectEntry, ObjectMeta, ObjectRead, PartEtag};
use async_trait::async_trait;

/// Uniform interface over a remote S3-compatible object store.
///
/// All operations are asynchronous and may fail with
/// [`Network`](crate::error::ErrorKind::Network) or
/// [`BackendError`](crate::error::ErrorKind::BackendError) when the remote
/// rejects or times out. Keys are relative to the configured prefix and must
/// pass [`validate_key`](crate::validate_key); implementations enforce this.
///
/// # Examples
///
/// ```
/// use shelf_storage::{ObjectStore, error::Result};
///
/// async fn size_of(store: &dyn ObjectStore, key: &str) -> Result<u64> {
///     Ok(store.stat(key).await?.map(|meta| meta.size).unwrap_or(0))
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the configured store (used for logging only).
    fn name(&self) -> &str;

    /// HEAD-style existence probe.
    ///
    /// Never raises for "not found" — and deliberately swallows *any* error
    /// into `false`, because every caller treats "can't tell" the same as
    /// "not there" (fall back to another source).
    async fn exists(&self, key: &str) -> bool;

    /// Get object metadata without reading contents.
    ///
    /// Returns `None` if the object does not exist.
    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Single-shot upload. Creates or overwrites the object.
    ///
    /// Callers are responsible for choosing this over
    /// [`upload_large`](crate::upload_large) based on size; the store will
    /// happily accept a multi-gigabyte body here and time out halfway.
    ///
    /// Returns the opaque reference (etag) issued by the remote.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String>;

    /// Read the object, optionally restricted to a byte range.
    ///
    /// `range` is `(start, end)` with an inclusive, optional end — mirroring
    /// HTTP `bytes=start-end` semantics. With no range the whole object is
    /// returned; either way [`ObjectRead::total_size`] reports the full
    /// object size. A store that ignores the range request raises
    /// [`RangeUnsupported`](crate::error::ErrorKind::RangeUnsupported).
    async fn get_range(&self, key: &str, range: Option<(u64, Option<u64>)>) -> Result<ObjectRead>;

    /// Delete an object. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List objects under a prefix, up to `max_keys` entries.
    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectEntry>>;

    /// Open a multipart upload session; returns the remote-issued upload id.
    ///
    /// A session must end in exactly one of
    /// [`complete_multipart`](Self::complete_multipart) or
    /// [`abort_multipart`](Self::abort_multipart) — a dangling session keeps
    /// billable storage reserved on the remote.
    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String>;

    /// Upload one part (1-based `part_number`); returns its etag.
    async fn upload_part(&self, upload_id: &str, key: &str, part_number: u32, data: &[u8]) -> Result<String>;

    /// Commit the session with the full ordered part list.
    async fn complete_multipart(&self, upload_id: &str, key: &str, parts: &[PartEtag]) -> Result<String>;

    /// Abandon the session so the remote reclaims the uploaded parts.
    async fn abort_multipart(&self, upload_id: &str, key: &str) -> Result<()>;
}
