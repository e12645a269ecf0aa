//! Large-file upload orchestration.
//!
//! Files under [`MULTIPART_THRESHOLD`] go through a single-shot
//! [`put`](crate::ObjectStore::put); everything else is uploaded in
//! [`PART_SIZE`] chunks through the store's multipart session API. A session
//! must never be left dangling: any part failure triggers exactly one abort
//! attempt before the original error propagates.
//!
//! Parts are uploaded sequentially. Parallel parts would need full buffering
//! up front plus cancellation of the other in-flight parts on first failure;
//! sequential keeps the failure model trivial and a personal library rarely
//! saturates an uplink with one file anyway.

use crate::error::{ErrorKind, Result};
use crate::object::PartEtag;
use crate::{ObjectStore, validate_key};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Files at or above this size are uploaded in parts.
pub const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
/// Fixed part size; the last part may be shorter.
pub const PART_SIZE: u64 = 100 * 1024 * 1024;

/// Progress report handed to the callback after every committed part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartProgress {
    pub part_number: u32,
    pub total_parts: u32,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

/// Upload a local file to the object store, choosing single-shot or
/// multipart transfer by size.
///
/// `progress` is invoked after every completed part (fire-and-continue; it
/// runs inline so it must not block). Returns the opaque reference issued by
/// the remote on completion.
///
/// # Failure semantics
///
/// Any part-upload failure aborts the entire session before the error
/// propagates; already-uploaded parts are not resumed by a later run, which
/// starts a fresh session.
pub async fn upload_large(
    store: &dyn ObjectStore,
    local_path: &Path,
    key: &str,
    content_type: &str,
    progress: impl FnMut(PartProgress) + Send,
) -> Result<String> {
    upload_with_layout(store, local_path, key, content_type, MULTIPART_THRESHOLD, PART_SIZE, progress).await
}

/// The actual transfer logic, with the size policy as parameters so tests
/// can exercise the part loop without writing hundreds of megabytes.
async fn upload_with_layout(
    store: &dyn ObjectStore,
    local_path: &Path,
    key: &str,
    content_type: &str,
    threshold: u64,
    part_size: u64,
    mut progress: impl FnMut(PartProgress) + Send,
) -> Result<String> {
    let key = validate_key(key)?;
    let mut file = File::open(local_path).await.map_err(ErrorKind::Io)?;
    let bytes_total = file.metadata().await.map_err(ErrorKind::Io)?.len();

    if bytes_total < threshold {
        let mut data = Vec::with_capacity(bytes_total as usize);
        file.read_to_end(&mut data).await.map_err(ErrorKind::Io)?;
        let reference = store.put(&key, &data, content_type).await?;
        progress(PartProgress {
            part_number: 1,
            total_parts: 1,
            bytes_done: bytes_total,
            bytes_total,
        });
        return Ok(reference);
    }

    let total_parts = bytes_total.div_ceil(part_size) as u32;
    let upload_id = store.create_multipart(&key, content_type).await?;
    tracing::debug!(key, upload_id, total_parts, bytes_total, "multipart session opened");

    let parts =
        match upload_parts(store, &mut file, &upload_id, &key, part_size, total_parts, bytes_total, &mut progress)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                abort_session(store, &upload_id, &key).await;
                return Err(err);
            },
        };
    let reference = match store.complete_multipart(&upload_id, &key, &parts).await {
        Ok(reference) => reference,
        Err(err) => {
            abort_session(store, &upload_id, &key).await;
            return Err(err);
        },
    };
    tracing::info!(key, upload_id, total_parts, "multipart upload complete");
    Ok(reference)
}

#[allow(clippy::too_many_arguments)]
async fn upload_parts(
    store: &dyn ObjectStore,
    file: &mut File,
    upload_id: &str,
    key: &str,
    part_size: u64,
    total_parts: u32,
    bytes_total: u64,
    progress: &mut (impl FnMut(PartProgress) + Send),
) -> Result<Vec<PartEtag>> {
    let mut parts = Vec::with_capacity(total_parts as usize);
    for part_number in 1..=total_parts {
        let offset = u64::from(part_number - 1) * part_size;
        let part_len = part_size.min(bytes_total - offset);
        let mut buffer = vec![0u8; part_len as usize];
        file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        file.read_exact(&mut buffer).await.map_err(ErrorKind::Io)?;
        let etag = store.upload_part(upload_id, key, part_number, &buffer).await?;
        parts.push(PartEtag { part_number, etag });
        progress(PartProgress {
            part_number,
            total_parts,
            bytes_done: offset + part_len,
            bytes_total,
        });
    }
    Ok(parts)
}

/// Best-effort abort. The primary error already dominates, so an abort
/// failure is logged and swallowed.
async fn abort_session(store: &dyn ObjectStore, upload_id: &str, key: &str) {
    if let Err(abort_err) = store.abort_multipart(upload_id, key).await {
        tracing::warn!(key, upload_id, error = %abort_err, "failed to abort multipart session; storage may be leaked on the remote");
    }
}
