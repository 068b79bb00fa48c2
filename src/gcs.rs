//! Google Cloud Storage backend.

use async_trait::async_trait;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::objects::Object;
use http::request::Parts;
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendKind};
use crate::file::FileReader;
use crate::{FileInfo, IncomingFile, Result, StorageError, UploadOptions, UploadOutcome};

/// Google Cloud Storage configuration: the destination bucket plus static
/// write options applied to every stored object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcsConfig {
    /// Destination bucket.
    pub bucket: String,
    /// Content type recorded on stored objects.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Custom metadata recorded on stored objects.
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    /// Cache-Control recorded on stored objects.
    #[serde(default)]
    pub cache_control: Option<String>,
}

impl GcsConfig {
    /// Create configuration for a bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Set the recorded content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a custom metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the recorded Cache-Control.
    pub fn cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }
}

/// Native write options for one streamed object upload.
#[derive(Debug, Clone, PartialEq)]
pub struct GcsWritePlan {
    /// Destination bucket.
    pub bucket: String,
    /// Content type recorded on the object.
    pub content_type: Option<String>,
    /// Custom metadata recorded on the object.
    pub metadata: Option<HashMap<String, String>>,
    /// Cache-Control recorded on the object.
    pub cache_control: Option<String>,
    /// Stream buffering hint from the chunk-size override.
    pub chunk_size: Option<usize>,
}

/// Translate configuration and per-call overrides into the write plan and
/// the resolved destination object name.
///
/// The write primitive is addressed via a separate object handle, so the
/// destination comes back beside the plan rather than inside it. An absent
/// override defaults the destination to the original file name.
pub(crate) fn translate(
    config: &GcsConfig,
    req: &Parts,
    file: &FileInfo,
    options: &UploadOptions,
) -> (GcsWritePlan, String) {
    let plan = GcsWritePlan {
        bucket: config.bucket.clone(),
        content_type: config.content_type.clone(),
        metadata: config.metadata.clone(),
        cache_control: config.cache_control.clone(),
        chunk_size: options.chunk_size,
    };

    let destination = options
        .resolve_key(req, file)
        .or_else(|| file.original_name.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    (plan, destination)
}

/// Map a stored object into the normalized outcome.
pub(crate) fn normalize(object: &Object, bucket: &str, destination: &str) -> UploadOutcome {
    UploadOutcome {
        filename: destination.to_string(),
        path: Some(format!(
            "https://storage.googleapis.com/{bucket}/{destination}"
        )),
        bucket: Some(if object.bucket.is_empty() {
            bucket.to_string()
        } else {
            object.bucket.clone()
        }),
        content_type: object.content_type.clone(),
        etag: (!object.etag.is_empty()).then(|| object.etag.clone()),
        size: u64::try_from(object.size).ok(),
        storage_class: object.storage_class.clone().filter(|s| !s.is_empty()),
        time_created: object.time_created.map(|t| t.to_string()),
        metadata: object.metadata.clone(),
        ..Default::default()
    }
}

fn is_not_found(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("404") || message.contains("not found")
}

/// Google Cloud Storage backend.
pub struct GcsBackend {
    client: Client,
    config: GcsConfig,
}

impl GcsBackend {
    /// Create a new GCS backend with default authentication.
    pub async fn new(config: GcsConfig) -> Result<Self> {
        let client_config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self::from_client(Client::new(client_config), config))
    }

    /// Create from an existing GCS client.
    pub fn from_client(client: Client, config: GcsConfig) -> Self {
        info!(bucket = %config.bucket, "Initialized GCS storage");
        Self { client, config }
    }

    /// Best-effort removal of a partially written object. Not-found is
    /// expected and ignored; other failures are logged and swallowed so the
    /// original transfer error is the one the caller sees.
    async fn cleanup_partial(&self, destination: &str) {
        let request = DeleteObjectRequest {
            bucket: self.config.bucket.clone(),
            object: destination.to_string(),
            ..Default::default()
        };
        if let Err(e) = self.client.delete_object(&request).await {
            let message = e.to_string();
            if !is_not_found(&message) {
                warn!(
                    object = %destination,
                    error = %message,
                    "Failed to clean up partial object"
                );
            }
        }
    }

    async fn transfer(
        &self,
        plan: &GcsWritePlan,
        destination: &str,
        reader: FileReader,
    ) -> Result<Object> {
        let request = UploadObjectRequest {
            bucket: plan.bucket.clone(),
            ..Default::default()
        };

        let has_object_fields = plan.content_type.is_some()
            || plan.metadata.is_some()
            || plan.cache_control.is_some();
        let upload_type = if has_object_fields {
            UploadType::Multipart(Box::new(Object {
                name: destination.to_string(),
                content_type: plan.content_type.clone(),
                metadata: plan.metadata.clone(),
                cache_control: plan.cache_control.clone(),
                ..Default::default()
            }))
        } else {
            UploadType::Simple(Media::new(destination.to_string()))
        };

        let stream = match plan.chunk_size {
            Some(chunk_size) if chunk_size > 0 => ReaderStream::with_capacity(reader, chunk_size),
            _ => ReaderStream::new(reader),
        };

        self.client
            .upload_streamed_object(&request, stream, &upload_type)
            .await
            .map_err(StorageError::transfer)
    }
}

#[async_trait]
impl Backend for GcsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gcs
    }

    async fn store(
        &self,
        req: &Parts,
        file: IncomingFile,
        options: &UploadOptions,
    ) -> Result<UploadOutcome> {
        let (info, reader) = file.into_parts();
        let (plan, destination) = translate(&self.config, req, &info, options);

        match self.transfer(&plan, &destination, reader).await {
            Ok(object) => {
                debug!(
                    object = %destination,
                    bucket = %plan.bucket,
                    size = object.size,
                    "Uploaded to GCS"
                );
                Ok(normalize(&object, &plan.bucket, &destination))
            }
            Err(e) => {
                // Never leave a partial object lingering undetected.
                self.cleanup_partial(&destination).await;
                Err(e)
            }
        }
    }

    async fn remove(&self, filename: &str) -> Result<()> {
        let request = DeleteObjectRequest {
            bucket: self.config.bucket.clone(),
            object: filename.to_string(),
            ..Default::default()
        };

        match self.client.delete_object(&request).await {
            Ok(()) => {
                debug!(object = %filename, bucket = %self.config.bucket, "Deleted from GCS");
                Ok(())
            }
            // An already-absent object is a successful delete.
            Err(e) if is_not_found(&e.to_string()) => Ok(()),
            Err(e) => Err(StorageError::delete(e)),
        }
    }
}
