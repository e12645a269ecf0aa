//! S3-compatible storage backend.
//!
//! This module provides the gateway implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Tigris (Fly.io), and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file. Each
//! target specifies its own `key_id` and `key_secret`.
//!
//! TODO: Future iteration - support `credentials: "profile:name"` in config
//! to use AWS SDK credential providers for actual AWS S3 targets. Not
//! implemented now since we primarily target Backblaze/MinIO which use
//! explicit credentials.

use crate::{
    ObjectStore,
    error::{ErrorKind, Result},
    object::{ObjectEntry, ObjectMeta, ObjectRead, PartEtag},
    validate_key,
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart},
};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
///
/// TODO: Adaptive rate limiting based on 429/throttling responses?
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// S3-compatible storage gateway.
///
/// Stores objects in an S3 bucket, optionally under a key prefix. All keys
/// are relative to the configured prefix (if any).
///
/// # Supported Services
///
/// - AWS S3
/// - Backblaze B2 (via S3-compatible API)
/// - Tigris (Fly.io storage)
/// - MinIO
/// - Other S3-compatible services
///
/// # Examples
///
/// ```no_run
/// use shelf_storage::backend::S3Store;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = S3Store::new(
///     "media-bucket",
///     "my-bucket",
///     Some("library/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Store {
    /// Create a new S3 storage gateway.
    ///
    /// # Arguments
    /// * `name` - A name for this store (used in display/logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix.map(validate_key).transpose()?;
        let name = name.into();
        let bucket = bucket.into();
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "shelf-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        // Set custom endpoint for non-AWS services
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        let rate_limiter = Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS));
        Ok(Self {
            name,
            client,
            bucket,
            prefix,
            rate_limiter,
        })
    }

    /// Construct the full S3 key from a relative key.
    fn full_key(&self, key: &str) -> Result<String> {
        let validated = validate_key(key)?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), validated),
            None => validated,
        })
    }

    /// Strip the configured prefix from an S3 key to get the relative key.
    fn relative_key(&self, key: &str) -> Result<String> {
        let relative = match &self.prefix {
            Some(prefix) => {
                let prefix_normalized = prefix.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        validate_key(relative)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .map_err(|_| ErrorKind::BackendError("S3 datetime out of range".to_string()).into())
    }

    /// Flatten an SDK error into the retryable Network category, keeping the
    /// full error context chain in the message.
    fn map_sdk_error<E>(err: SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> ErrorKind
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ErrorKind::Network(format!("{}", DisplayErrorContext(&err)))
    }

    /// Total object size out of a `Content-Range: bytes start-end/total` header.
    fn total_from_content_range(header: &str) -> Option<u64> {
        header.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> bool {
        let Ok(full_key) = self.full_key(key) else {
            return false;
        };
        let _permit = self.acquire_permit().await;
        match self.client.head_object().bucket(&self.bucket).key(&full_key).send().await {
            Ok(_) => true,
            Err(err) => {
                if !err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    tracing::debug!(key = %full_key, error = %DisplayErrorContext(&err), "existence probe failed; treating as absent");
                }
                false
            },
        }
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        let head = match self.client.head_object().bucket(&self.bucket).key(&full_key).send().await {
            Ok(head) => head,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => return Ok(None),
            Err(err) => return Err(Self::map_sdk_error(err).into()),
        };
        let size = head.content_length().unwrap_or(0).max(0) as u64;
        let content_type = head.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
        let last_modified = match head.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        Ok(Some(ObjectMeta { size, content_type, last_modified }))
    }

    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(output.e_tag().unwrap_or_default().to_string())
    }

    async fn get_range(&self, key: &str, range: Option<(u64, Option<u64>)>) -> Result<ObjectRead> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        let mut request = self.client.get_object().bucket(&self.bucket).key(&full_key);
        if let Some((start, end)) = range {
            let header = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            request = request.range(header);
        }
        let output = match request.send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(key.to_string()));
            },
            Err(err) => return Err(Self::map_sdk_error(err).into()),
        };
        let content_type = output.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
        let total_size = match range {
            // A store that honoured the range reports the full size in
            // Content-Range; one that ignored it sent the whole body back
            // with a 200, which would corrupt a seek — refuse it.
            Some(_) => match output.content_range().and_then(Self::total_from_content_range) {
                Some(total) => total,
                None => exn::bail!(ErrorKind::RangeUnsupported(key.to_string())),
            },
            None => output.content_length().unwrap_or(0).max(0) as u64,
        };
        Ok(ObjectRead {
            reader: Box::new(output.body.into_async_read()),
            total_size,
            content_type,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        // S3 DeleteObject is a silent no-op for missing keys; probe first so
        // callers learn whether anything was actually removed.
        if !self.exists(key).await {
            return Ok(false);
        }
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(true)
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectEntry>> {
        let full_prefix = self.full_key(prefix)?;
        let _permit = self.acquire_permit().await;
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&full_prefix)
            .max_keys(max_keys.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        let mut entries = Vec::new();
        for object in output.contents() {
            let Some(key) = object.key() else {
                continue;
            };
            let key = self.relative_key(key)?;
            let last_modified = match object.last_modified() {
                Some(dt) => Self::parse_datetime(dt)?,
                None => OffsetDateTime::UNIX_EPOCH,
            };
            entries.push(ObjectEntry {
                key,
                size: object.size().unwrap_or(0).max(0) as u64,
                last_modified,
            });
        }
        Ok(entries)
    }

    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        match output.upload_id() {
            Some(id) => Ok(id.to_string()),
            None => exn::bail!(ErrorKind::BackendError("multipart session created without an upload id".to_string())),
        }
    }

    async fn upload_part(&self, upload_id: &str, key: &str, part_number: u32, data: &[u8]) -> Result<String> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&full_key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(output.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart(&self, upload_id: &str, key: &str, parts: &[PartEtag]) -> Result<String> {
        let full_key = self.full_key(key)?;
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder().part_number(part.part_number as i32).e_tag(&part.etag).build()
                    })
                    .collect(),
            ))
            .build();
        let _permit = self.acquire_permit().await;
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(output.e_tag().unwrap_or_default().to_string())
    }

    async fn abort_multipart(&self, upload_id: &str, key: &str) -> Result<()> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }
}
