//! In-memory storage backend for testing.

use crate::ObjectStore;
use crate::error::{ErrorKind, Result};
use crate::object::{ObjectEntry, ObjectMeta, ObjectRead, PartEtag};
use crate::validate_key;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    modified: OffsetDateTime,
}

struct Session {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// In-memory object store for testing.
///
/// Objects live in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Multipart sessions
/// are tracked fully, and part uploads can be made to fail on demand so
/// tests can assert the abort-on-failure contract.
///
/// # Examples
///
/// ```
/// use shelf_storage::backend::{MemoryStore, ObjectStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::with_objects([
///     ("magazine/issue-042.pdf", b"%PDF-1.7...".to_vec()),
/// ]);
/// assert!(store.exists("magazine/issue-042.pdf").await);
///
/// store.put("ebook/novel.epub", b"PK...", "application/epub+zip").await?;
/// assert!(store.exists("ebook/novel.epub").await);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    sessions: RwLock<HashMap<String, Session>>,
    next_upload_id: AtomicU64,
    /// When set, `upload_part` for this part number fails with a network error.
    fail_on_part: Option<u32>,
    aborts: AtomicUsize,
    completions: AtomicUsize,
}

impl MemoryStore {
    /// Create a mock store pre-populated with objects.
    ///
    /// Panics if any key fails validation (e.g. traversal). If test setup is
    /// wrong, then the test should not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let store = Self::default();
        let now = OffsetDateTime::now_utc();
        let mut map = HashMap::new();
        for (key, data) in objects {
            let key = key.into();
            let Ok(validated) = validate_key(&key) else {
                // The panic here is DELIBERATE. MemoryStore is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MemoryStore::with_objects: invalid key {key}");
            };
            map.insert(
                validated,
                StoredObject {
                    data: data.into(),
                    content_type: "application/octet-stream".to_string(),
                    modified: now,
                },
            );
        }
        *store.objects.try_write().unwrap() = map;
        store
    }

    /// Make `upload_part` fail for the given 1-based part number.
    pub fn fail_on_part(mut self, part_number: u32) -> Self {
        self.fail_on_part = Some(part_number);
        self
    }

    /// How many times `abort_multipart` has been called.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// How many times `complete_multipart` has been called.
    pub fn completion_count(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    /// Number of multipart sessions currently open (neither completed nor
    /// aborted).
    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, key: &str) -> bool {
        let Ok(key) = validate_key(key) else {
            return false;
        };
        self.objects.read().await.contains_key(&key)
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let key = validate_key(key)?;
        Ok(self.objects.read().await.get(&key).map(|object| ObjectMeta {
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            last_modified: object.modified,
        }))
    }

    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String> {
        let key = validate_key(key)?;
        self.objects.write().await.insert(
            key.clone(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
                modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(format!("etag-{key}"))
    }

    async fn get_range(&self, key: &str, range: Option<(u64, Option<u64>)>) -> Result<ObjectRead> {
        let key = validate_key(key)?;
        let guard = self.objects.read().await;
        let object = guard.get(&key).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.clone())))?;
        let total = object.data.len() as u64;
        let span = match range {
            None => object.data.clone(),
            Some((start, end)) => {
                if start >= total {
                    exn::bail!(ErrorKind::BackendError(format!("range start {start} beyond object size {total}")));
                }
                let end = end.map(|e| e.min(total - 1)).unwrap_or(total - 1);
                object.data[start as usize..=end as usize].to_vec()
            },
        };
        Ok(ObjectRead {
            reader: Box::new(Cursor::new(span)),
            total_size: total,
            content_type: object.content_type.clone(),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        Ok(self.objects.write().await.remove(&key).is_some())
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectEntry>> {
        let prefix = validate_key(prefix)?;
        let guard = self.objects.read().await;
        let mut entries: Vec<ObjectEntry> = guard
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.modified,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries.truncate(max_keys);
        Ok(entries)
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String> {
        let key = validate_key(key)?;
        let upload_id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.write().await.insert(
            upload_id.clone(),
            Session {
                key,
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(&self, upload_id: &str, _key: &str, part_number: u32, data: &[u8]) -> Result<String> {
        if self.fail_on_part == Some(part_number) {
            exn::bail!(ErrorKind::Network(format!("injected failure uploading part {part_number}")));
        }
        let mut guard = self.sessions.write().await;
        let session = guard
            .get_mut(upload_id)
            .ok_or_else(|| exn::Exn::from(ErrorKind::BackendError(format!("unknown upload id {upload_id}"))))?;
        session.parts.insert(part_number, data.to_vec());
        Ok(format!("etag-part-{part_number}"))
    }

    async fn complete_multipart(&self, upload_id: &str, key: &str, parts: &[PartEtag]) -> Result<String> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.sessions.write().await;
        let session = guard
            .remove(upload_id)
            .ok_or_else(|| exn::Exn::from(ErrorKind::BackendError(format!("unknown upload id {upload_id}"))))?;
        // The part list must cover exactly the uploaded parts, in order.
        let uploaded: Vec<u32> = session.parts.keys().copied().collect();
        let listed: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        if uploaded != listed {
            exn::bail!(ErrorKind::BackendError(format!(
                "completion part list {listed:?} does not match uploaded parts {uploaded:?}"
            )));
        }
        let data: Vec<u8> = session.parts.into_values().flatten().collect();
        drop(guard);
        self.put(key, &data, &session.content_type).await?;
        Ok(format!("etag-{key}"))
    }

    async fn abort_multipart(&self, upload_id: &str, _key: &str) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .write()
            .await
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| exn::Exn::from(ErrorKind::BackendError(format!("unknown upload id {upload_id}"))))
    }
}
