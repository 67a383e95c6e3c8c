//! S3 backend with content-addressed incremental publish.
//!
//! ## Change detection
//!
//! For every page the backend computes a checksum of the fetched body
//! (base64 SHA-256, the format of S3's native `x-amz-checksum-sha256`) and
//! compares it with the checksum stored on the existing object:
//!
//! | Remote object | Action | Network writes |
//! |---------------|--------|----------------|
//! | missing | upload | 1 |
//! | checksum differs (or absent) | upload | 1 |
//! | checksum equal | skip | 0 |
//!
//! Stored checksums are compared after stripping surrounding quotes and must
//! match exactly.
//!
//! ## Website hosting
//!
//! At initialize the bucket is switched to static website hosting with
//! [`INDEX_DOCUMENT`] as the index suffix, so `/blog/` is served from the
//! `blog/index.html` key, and the configured error document (default
//! `500.html`).
//!
//! ## Invalidation
//!
//! Every published URL (and its object key when that differs) is recorded in
//! the session's [`PublishedPaths`]. At finalize, if a CloudFront distribution
//! is configured and fewer than [`MAX_INVALIDATIONS_IN_FLIGHT`] invalidation
//! batches are already running, one batch covering all of them is submitted.
//! Any CDN failure is logged and ignored.
//!
//! ## Storage seams
//!
//! The backend talks to [`ObjectStore`] and [`Cdn`], not to the AWS SDK
//! directly. [`S3Store`] and [`CloudFrontCdn`] are the production
//! implementations; both are synchronous wrappers that block on a shared
//! tokio runtime, since pages are published from rayon worker threads.

use super::{Backend, BackendError, PublishAction, Published, PublishError, PublishedPaths};
use crate::config::{Config, ConfigError, ObjectStorageConfig};
use crate::fetch::PageFetcher;
use crate::output_path;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

pub const NAME: &str = "object-storage";

/// Index suffix for website hosting; matches the name directory pages are
/// stored under.
pub const INDEX_DOCUMENT: &str = "index.html";

pub const DEFAULT_ERROR_DOCUMENT: &str = "500.html";

/// CloudFront rejects new batches beyond this many in progress.
pub const MAX_INVALIDATIONS_IN_FLIGHT: usize = 3;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl StoreError {
    fn request(operation: &'static str, err: impl std::error::Error) -> Self {
        Self::Request {
            operation,
            message: aws_sdk_s3::error::DisplayErrorContext(err).to_string(),
        }
    }
}

/// Metadata of an object that already exists at a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Stored checksum, if the object carries one.
    pub checksum: Option<String>,
}

/// Minimal bucket operations the backend needs.
pub trait ObjectStore: Send + Sync {
    /// Confirm the bucket is reachable.
    fn verify(&self) -> Result<(), StoreError>;

    /// Enable static website hosting with the given index suffix and error key.
    fn configure_website(
        &self,
        index_document: &str,
        error_document: &str,
    ) -> Result<(), StoreError>;

    /// `None` when no object exists at `key`.
    fn head(&self, key: &str) -> Result<Option<RemoteObject>, StoreError>;

    /// Upload a public-readable object with its content type and checksum.
    fn upload(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
        checksum: &str,
    ) -> Result<(), StoreError>;

    /// Public base URL, used for log lines.
    fn endpoint(&self) -> String;
}

/// CDN in front of the bucket.
pub trait Cdn: Send + Sync {
    fn in_progress_invalidations(&self) -> Result<usize, StoreError>;

    /// Submit one invalidation batch; returns its id.
    fn invalidate(&self, paths: &[String]) -> Result<String, StoreError>;
}

/// Checksum of a page body: base64-encoded SHA-256.
pub fn content_checksum(body: &[u8]) -> String {
    BASE64.encode(Sha256::digest(body))
}

/// Stored checksums and ETags come back quoted.
fn strip_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

pub(super) fn build(
    config: &Config,
    published: Arc<PublishedPaths>,
) -> Result<Box<dyn Backend>, ConfigError> {
    let settings = &config.object_storage;
    if settings.bucket.is_empty() {
        return Err(ConfigError::Validation(
            "object_storage.bucket must be set for the object-storage backend".into(),
        ));
    }
    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?,
    );
    let sdk_config = runtime.block_on(load_sdk_config(settings));
    let store = S3Store::new(settings, &sdk_config, Arc::clone(&runtime));
    let cdn = settings.distribution_id.as_ref().map(|id| {
        Box::new(CloudFrontCdn::new(id, &sdk_config, Arc::clone(&runtime))) as Box<dyn Cdn>
    });
    Ok(Box::new(
        ObjectStorageBackend::new(Box::new(store), cdn, published)
            .with_error_document(&settings.error_document),
    ))
}

async fn load_sdk_config(settings: &ObjectStorageConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &settings.region {
        loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
    }
    if let (Some(id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            id.clone(),
            secret.clone(),
            None,
            None,
            "pagepress-config",
        ));
    }
    loader.load().await
}

pub struct ObjectStorageBackend {
    store: Box<dyn ObjectStore>,
    cdn: Option<Box<dyn Cdn>>,
    published: Arc<PublishedPaths>,
    error_document: String,
}

impl ObjectStorageBackend {
    pub fn new(
        store: Box<dyn ObjectStore>,
        cdn: Option<Box<dyn Cdn>>,
        published: Arc<PublishedPaths>,
    ) -> Self {
        Self {
            store,
            cdn,
            published,
            error_document: DEFAULT_ERROR_DOCUMENT.to_string(),
        }
    }

    /// Key served by website hosting when a request fails.
    pub fn with_error_document(mut self, key: &str) -> Self {
        self.error_document = key.trim_start_matches('/').to_string();
        self
    }

    fn invalidate(&self, cdn: &dyn Cdn) {
        let paths = self.published.snapshot();
        if paths.is_empty() {
            info!("Nothing published; skipping invalidation");
            return;
        }
        match cdn.in_progress_invalidations() {
            Ok(in_flight) if in_flight < MAX_INVALIDATIONS_IN_FLIGHT => {
                match cdn.invalidate(&paths) {
                    Ok(id) => info!(paths = paths.len(), "Invalidation request ID: {id}"),
                    Err(e) => warn!(error = %e, "Invalidation request failed"),
                }
            }
            Ok(in_flight) => {
                warn!(in_flight, "Too many invalidations in progress; skipping invalidation")
            }
            Err(e) => warn!(error = %e, "Could not read CDN distribution; skipping invalidation"),
        }
    }
}

impl Backend for ObjectStorageBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize_output(&self) -> Result<(), BackendError> {
        self.store.verify().map_err(|e| {
            BackendError::Configuration(format!("bucket is not usable: {e}"))
        })?;
        self.store
            .configure_website(INDEX_DOCUMENT, &self.error_document)?;
        debug!(
            index = INDEX_DOCUMENT,
            error = %self.error_document,
            "Website hosting enabled"
        );
        info!("Publishing to {}", self.store.endpoint());
        Ok(())
    }

    fn publish(&self, fetcher: &mut PageFetcher, path: &str) -> Result<Published, PublishError> {
        let page = fetcher.fetch(path)?;
        let key = output_path::resolve(path, &page.content_type);
        let checksum = content_checksum(&page.body);

        let action = match self.store.head(&key)? {
            None => {
                self.store
                    .upload(&key, &page.body, &page.content_type, &checksum)?;
                PublishAction::Created
            }
            Some(remote) => {
                let stored = remote.checksum.as_deref().map(strip_quotes);
                debug!(key = %key, ?stored, computed = %checksum, "comparing checksums");
                if stored == Some(checksum.as_str()) {
                    PublishAction::Unchanged
                } else {
                    self.store
                        .upload(&key, &page.body, &page.content_type, &checksum)?;
                    PublishAction::Updated
                }
            }
        };

        self.published.record(path);
        let key_url = format!("/{key}");
        if key_url != path {
            self.published.record(key_url);
        }

        let verb = match action {
            PublishAction::Created => "Creating",
            PublishAction::Updated => "Updating",
            _ => "Skipping",
        };
        info!("{verb} {}{path}", self.store.endpoint());

        Ok(Published {
            path: page.path,
            location: key,
            content_type: page.content_type,
            action,
        })
    }

    fn finalize_output(&self) -> Result<(), BackendError> {
        match &self.cdn {
            Some(cdn) => self.invalidate(cdn.as_ref()),
            None => debug!("No CDN distribution configured"),
        }
        Ok(())
    }
}

/// [`ObjectStore`] over the AWS S3 SDK.
pub struct S3Store {
    bucket: String,
    endpoint: String,
    client: aws_sdk_s3::Client,
    runtime: Arc<Runtime>,
}

impl S3Store {
    pub fn new(
        settings: &ObjectStorageConfig,
        sdk_config: &aws_config::SdkConfig,
        runtime: Arc<Runtime>,
    ) -> Self {
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "us-east-1".to_string());
        Self {
            endpoint: format!("http://{}.s3-website-{region}.amazonaws.com", settings.bucket),
            bucket: settings.bucket.clone(),
            client: aws_sdk_s3::Client::new(sdk_config),
            runtime,
        }
    }
}

impl ObjectStore for S3Store {
    fn verify(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.client.head_bucket().bucket(&self.bucket).send())
            .map(|_| ())
            .map_err(|e| StoreError::request("HeadBucket", e))
    }

    fn configure_website(
        &self,
        index_document: &str,
        error_document: &str,
    ) -> Result<(), StoreError> {
        use aws_sdk_s3::types::{ErrorDocument, IndexDocument, WebsiteConfiguration};

        let index = IndexDocument::builder()
            .suffix(index_document)
            .build()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let error = ErrorDocument::builder()
            .key(error_document)
            .build()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let website = WebsiteConfiguration::builder()
            .index_document(index)
            .error_document(error)
            .build();
        self.runtime
            .block_on(
                self.client
                    .put_bucket_website()
                    .bucket(&self.bucket)
                    .website_configuration(website)
                    .send(),
            )
            .map(|_| ())
            .map_err(|e| StoreError::request("PutBucketWebsite", e))
    }

    fn head(&self, key: &str) -> Result<Option<RemoteObject>, StoreError> {
        let result = self.runtime.block_on(
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .checksum_mode(aws_sdk_s3::types::ChecksumMode::Enabled)
                .send(),
        );
        match result {
            Ok(output) => Ok(Some(RemoteObject {
                checksum: output.checksum_sha256().map(str::to_string),
            })),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(StoreError::request("HeadObject", err)),
        }
    }

    fn upload(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
        checksum: &str,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(body.to_vec()))
                    .content_type(content_type)
                    .acl(aws_sdk_s3::types::ObjectCannedAcl::PublicRead)
                    .checksum_algorithm(aws_sdk_s3::types::ChecksumAlgorithm::Sha256)
                    .checksum_sha256(checksum)
                    .send(),
            )
            .map(|_| ())
            .map_err(|e| StoreError::request("PutObject", e))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// [`Cdn`] over the AWS CloudFront SDK.
pub struct CloudFrontCdn {
    distribution_id: String,
    client: aws_sdk_cloudfront::Client,
    runtime: Arc<Runtime>,
}

impl CloudFrontCdn {
    pub fn new(
        distribution_id: &str,
        sdk_config: &aws_config::SdkConfig,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            distribution_id: distribution_id.to_string(),
            client: aws_sdk_cloudfront::Client::new(sdk_config),
            runtime,
        }
    }
}

impl Cdn for CloudFrontCdn {
    fn in_progress_invalidations(&self) -> Result<usize, StoreError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .get_distribution()
                    .id(&self.distribution_id)
                    .send(),
            )
            .map_err(|e| StoreError::request("GetDistribution", e))?;
        let distribution = output.distribution().ok_or_else(|| {
            StoreError::Invalid(format!("distribution {} not found", self.distribution_id))
        })?;
        Ok(usize::try_from(distribution.in_progress_invalidation_batches()).unwrap_or(0))
    }

    fn invalidate(&self, paths: &[String]) -> Result<String, StoreError> {
        use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};

        let quantity = i32::try_from(paths.len())
            .map_err(|_| StoreError::Invalid(format!("too many paths: {}", paths.len())))?;
        let batch_paths = Paths::builder()
            .quantity(quantity)
            .set_items(Some(paths.to_vec()))
            .build()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let caller_reference = format!(
            "pagepress-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        );
        let batch = InvalidationBatch::builder()
            .paths(batch_paths)
            .caller_reference(caller_reference)
            .build()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let output = self
            .runtime
            .block_on(
                self.client
                    .create_invalidation()
                    .distribution_id(&self.distribution_id)
                    .invalidation_batch(batch)
                    .send(),
            )
            .map_err(|e| StoreError::request("CreateInvalidation", e))?;
        Ok(output
            .invalidation()
            .map(|i| i.id().to_string())
            .unwrap_or_default())
    }
}
