//! S3-compatible object store backend.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, ObjectCannedAcl, ServerSideEncryption, StorageClass,
};
use aws_sdk_s3::Client;
use futures::stream::{FuturesUnordered, StreamExt};
use http::request::Parts;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendKind};
use crate::content_type;
use crate::file::FileReader;
use crate::{FileInfo, IncomingFile, Result, StorageError, UploadOptions, UploadOutcome};

/// Default part size for multipart transfers (the service minimum).
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default number of parts in flight during a multipart transfer.
pub const DEFAULT_QUEUE_SIZE: usize = 4;

/// S3 configuration: destination bucket plus static upload parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Config {
    /// Destination bucket.
    pub bucket: String,
    /// Region, used for client construction and public URLs.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services; switches the client to
    /// path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Static default destination key.
    #[serde(default)]
    pub key: Option<String>,
    /// Explicit content type; otherwise resolved from the file name.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Custom metadata recorded on stored objects.
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    /// Canned ACL applied to stored objects.
    #[serde(default)]
    pub acl: Option<String>,
    /// Server-side encryption applied to stored objects.
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    /// Storage class for stored objects.
    #[serde(default)]
    pub storage_class: Option<String>,
}

impl S3Config {
    /// Create configuration for a bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Set the region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set a custom endpoint (for S3-compatible services like MinIO).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the static default destination key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set an explicit content type.
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

    /// Set the canned ACL.
    pub fn acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    /// Set server-side encryption.
    pub fn encryption(mut self, encryption: impl Into<String>) -> Self {
        self.server_side_encryption = Some(encryption.into());
        self
    }

    /// Enable AES256 server-side encryption.
    pub fn aes256_encryption(self) -> Self {
        self.encryption("AES256")
    }

    /// Set the storage class.
    pub fn storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }
}

/// Native arguments for one managed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct S3UploadPlan {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Content type recorded on the object.
    pub content_type: String,
    /// Custom metadata recorded on the object.
    pub metadata: Option<HashMap<String, String>>,
    /// URL-encoded tag set.
    pub tagging: Option<String>,
    /// Canned ACL.
    pub acl: Option<String>,
    /// Server-side encryption.
    pub server_side_encryption: Option<String>,
    /// Storage class.
    pub storage_class: Option<String>,
    /// Part size in bytes.
    pub part_size: usize,
    /// Parts in flight.
    pub queue_size: usize,
    /// Keep uploaded parts when the transfer fails.
    pub leave_parts_on_error: bool,
}

/// What the service reported for a completed transfer; the two transfer
/// shapes (single put, multipart) reduce to this before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct S3TransferReceipt {
    /// Location URL, when echoed.
    pub location: Option<String>,
    /// Bucket, when echoed.
    pub bucket: Option<String>,
    /// Key, when echoed.
    pub key: Option<String>,
    /// Entity tag.
    pub etag: Option<String>,
    /// Version id, on versioned buckets.
    pub version_id: Option<String>,
    /// Server-side encryption applied.
    pub server_side_encryption: Option<String>,
}

/// Translate configuration and per-call overrides into the native upload
/// arguments.
///
/// Key precedence: override (literal or derived) → static default key →
/// original file name. The content type falls back to resolution from the
/// file name when no explicit static value is configured.
pub(crate) fn translate(
    config: &S3Config,
    req: &Parts,
    file: &FileInfo,
    options: &UploadOptions,
) -> S3UploadPlan {
    let key = options
        .resolve_key(req, file)
        .or_else(|| config.key.clone())
        .or_else(|| file.original_name.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let content_type = config.content_type.clone().unwrap_or_else(|| {
        file.original_name
            .as_deref()
            .map(content_type::resolve_str)
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string())
    });

    let tagging = if options.tags.is_empty() {
        None
    } else {
        Some(
            options
                .tags
                .iter()
                .map(|(key, value)| {
                    format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
                })
                .collect::<Vec<_>>()
                .join("&"),
        )
    };

    S3UploadPlan {
        bucket: config.bucket.clone(),
        key,
        content_type,
        metadata: config.metadata.clone(),
        tagging,
        acl: config.acl.clone(),
        server_side_encryption: config.server_side_encryption.clone(),
        storage_class: config.storage_class.clone(),
        part_size: options.chunk_size.unwrap_or(DEFAULT_PART_SIZE),
        queue_size: options.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE).max(1),
        leave_parts_on_error: options.leave_parts_on_error,
    }
}

/// Map a transfer receipt into the normalized outcome.
///
/// The service does not echo content type or metadata back, so those come
/// from the translated plan.
pub(crate) fn normalize(
    receipt: &S3TransferReceipt,
    plan: &S3UploadPlan,
    fallback_location: String,
) -> UploadOutcome {
    UploadOutcome {
        filename: receipt.key.clone().unwrap_or_else(|| plan.key.clone()),
        path: Some(receipt.location.clone().unwrap_or(fallback_location)),
        bucket: Some(receipt.bucket.clone().unwrap_or_else(|| plan.bucket.clone())),
        content_type: Some(plan.content_type.clone()),
        metadata: plan.metadata.clone(),
        etag: receipt.etag.clone(),
        version_id: receipt.version_id.clone(),
        encryption: receipt.server_side_encryption.clone(),
        ..Default::default()
    }
}

async fn read_part(reader: &mut FileReader, part_size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; part_size];
    let mut filled = 0;
    while filled < part_size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// S3-compatible object store backend.
pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    /// Create a new S3 backend from the default credential chain.
    pub async fn new(config: S3Config) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(region) = &config.region {
            builder = builder.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
            builder = builder.force_path_style(true);
        }

        Ok(Self::from_client(Client::from_conf(builder.build()), config))
    }

    /// Create from an existing SDK client.
    pub fn from_client(client: Client, config: S3Config) -> Self {
        info!(bucket = %config.bucket, "Initialized S3 storage");
        Self { client, config }
    }

    /// Public URL for a key, used when the service does not echo a location.
    pub fn public_url(&self, key: &str) -> String {
        if let Some(endpoint) = &self.config.endpoint {
            format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.config.bucket,
                key
            )
        } else if let Some(region) = &self.config.region {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.config.bucket, region, key
            )
        } else {
            format!("https://{}.s3.amazonaws.com/{}", self.config.bucket, key)
        }
    }

    async fn put_single(&self, plan: &S3UploadPlan, body: Vec<u8>) -> Result<S3TransferReceipt> {
        let mut request = self
            .client
            .put_object()
            .bucket(&plan.bucket)
            .key(&plan.key)
            .body(ByteStream::from(body))
            .content_type(&plan.content_type);

        if let Some(metadata) = &plan.metadata {
            request = request.set_metadata(Some(metadata.clone()));
        }
        if let Some(tagging) = &plan.tagging {
            request = request.tagging(tagging);
        }
        if let Some(acl) = &plan.acl
            && let Ok(acl) = acl.parse::<ObjectCannedAcl>()
        {
            request = request.acl(acl);
        }
        if let Some(sse) = &plan.server_side_encryption
            && let Ok(sse) = sse.parse::<ServerSideEncryption>()
        {
            request = request.server_side_encryption(sse);
        }
        if let Some(class) = &plan.storage_class
            && let Ok(class) = class.parse::<StorageClass>()
        {
            request = request.storage_class(class);
        }

        let output = request.send().await.map_err(StorageError::transfer)?;

        Ok(S3TransferReceipt {
            location: None,
            bucket: None,
            key: None,
            etag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
            server_side_encryption: output
                .server_side_encryption()
                .map(|sse| sse.as_str().to_string()),
        })
    }

    async fn upload_parts(
        &self,
        plan: &S3UploadPlan,
        upload_id: &str,
        first: Vec<u8>,
        mut reader: FileReader,
    ) -> Result<Vec<CompletedPart>> {
        let mut in_flight = FuturesUnordered::new();
        let mut completed = Vec::new();
        let mut part_number = 1i32;
        let mut chunk = first;

        loop {
            let at_eof = chunk.len() < plan.part_size;

            if !chunk.is_empty() {
                let client = self.client.clone();
                let bucket = plan.bucket.clone();
                let key = plan.key.clone();
                let upload_id = upload_id.to_string();
                let number = part_number;
                let body = chunk;

                in_flight.push(async move {
                    let output = client
                        .upload_part()
                        .bucket(bucket)
                        .key(key)
                        .upload_id(upload_id)
                        .part_number(number)
                        .body(ByteStream::from(body))
                        .send()
                        .await
                        .map_err(StorageError::transfer)?;

                    let etag = output
                        .e_tag()
                        .ok_or_else(|| {
                            StorageError::Backend(format!("no ETag returned for part {number}"))
                        })?
                        .to_string();

                    Ok::<_, StorageError>(
                        CompletedPart::builder()
                            .part_number(number)
                            .e_tag(etag)
                            .build(),
                    )
                });
                part_number += 1;
            }

            while in_flight.len() >= plan.queue_size {
                match in_flight.next().await {
                    Some(part) => completed.push(part?),
                    None => break,
                }
            }

            if at_eof {
                break;
            }
            chunk = read_part(&mut reader, plan.part_size).await?;
        }

        while let Some(part) = in_flight.next().await {
            completed.push(part?);
        }

        completed.sort_by_key(|part| part.part_number().unwrap_or_default());
        Ok(completed)
    }

    async fn put_multipart(
        &self,
        plan: &S3UploadPlan,
        first: Vec<u8>,
        reader: FileReader,
    ) -> Result<S3TransferReceipt> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&plan.bucket)
            .key(&plan.key)
            .content_type(&plan.content_type);

        if let Some(metadata) = &plan.metadata {
            request = request.set_metadata(Some(metadata.clone()));
        }
        if let Some(tagging) = &plan.tagging {
            request = request.tagging(tagging);
        }
        if let Some(acl) = &plan.acl
            && let Ok(acl) = acl.parse::<ObjectCannedAcl>()
        {
            request = request.acl(acl);
        }
        if let Some(sse) = &plan.server_side_encryption
            && let Ok(sse) = sse.parse::<ServerSideEncryption>()
        {
            request = request.server_side_encryption(sse);
        }
        if let Some(class) = &plan.storage_class
            && let Ok(class) = class.parse::<StorageClass>()
        {
            request = request.storage_class(class);
        }

        let created = request.send().await.map_err(StorageError::transfer)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Backend("no upload id returned".to_string()))?
            .to_string();

        let parts = match self.upload_parts(plan, &upload_id, first, reader).await {
            Ok(parts) => parts,
            Err(e) => {
                if !plan.leave_parts_on_error {
                    self.abort(plan, &upload_id).await;
                }
                return Err(e);
            }
        };

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&plan.bucket)
            .key(&plan.key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await;

        match output {
            Ok(output) => Ok(S3TransferReceipt {
                location: output.location().map(String::from),
                bucket: output.bucket().map(String::from),
                key: output.key().map(String::from),
                etag: output.e_tag().map(String::from),
                version_id: output.version_id().map(String::from),
                server_side_encryption: output
                    .server_side_encryption()
                    .map(|sse| sse.as_str().to_string()),
            }),
            Err(e) => {
                if !plan.leave_parts_on_error {
                    self.abort(plan, &upload_id).await;
                }
                Err(StorageError::transfer(e))
            }
        }
    }

    /// Best-effort abort of a failed multipart upload so no parts linger.
    async fn abort(&self, plan: &S3UploadPlan, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&plan.bucket)
            .key(&plan.key)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(e) = result {
            warn!(
                key = %plan.key,
                bucket = %plan.bucket,
                error = %e,
                "Failed to abort multipart upload"
            );
        }
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn store(
        &self,
        req: &Parts,
        file: IncomingFile,
        options: &UploadOptions,
    ) -> Result<UploadOutcome> {
        let (info, mut reader) = file.into_parts();
        let plan = translate(&self.config, req, &info, options);

        // A payload that fits in one part short-circuits to a single put.
        let first = read_part(&mut reader, plan.part_size).await?;
        let receipt = if first.len() < plan.part_size {
            self.put_single(&plan, first).await?
        } else {
            self.put_multipart(&plan, first, reader).await?
        };

        debug!(key = %plan.key, bucket = %plan.bucket, "Uploaded to S3");

        let fallback_location = self.public_url(&plan.key);
        Ok(normalize(&receipt, &plan, fallback_location))
    }

    async fn remove(&self, filename: &str) -> Result<()> {
        // Deleting an absent key succeeds; the operation is idempotent.
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(filename)
            .send()
            .await
            .map_err(StorageError::delete)?;

        debug!(key = %filename, bucket = %self.config.bucket, "Deleted from S3");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Parts {
        let (parts, _) = http::Request::builder()
            .uri("/upload")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn report() -> FileInfo {
        FileInfo {
            original_name: Some("report.pdf".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_translate_resolves_content_type_from_name() {
        let plan = translate(
            &S3Config::new("uploads"),
            &request(),
            &report(),
            &UploadOptions::new(),
        );
        assert_eq!(plan.content_type, "application/pdf");
        assert_eq!(plan.key, "report.pdf");
        assert_eq!(plan.part_size, DEFAULT_PART_SIZE);
        assert_eq!(plan.queue_size, DEFAULT_QUEUE_SIZE);
    }

    #[test]
    fn test_translate_explicit_content_type_wins() {
        let config = S3Config::new("uploads").content_type("application/x-custom");
        let plan = translate(&config, &request(), &report(), &UploadOptions::new());
        assert_eq!(plan.content_type, "application/x-custom");
    }

    #[test]
    fn test_translate_key_precedence() {
        let config = S3Config::new("uploads").key("static-key");

        // Static default key beats the original name.
        let plan = translate(&config, &request(), &report(), &UploadOptions::new());
        assert_eq!(plan.key, "static-key");

        // A literal override beats both.
        let literal = UploadOptions::new().public_id("override-key");
        let plan = translate(&config, &request(), &report(), &literal);
        assert_eq!(plan.key, "override-key");

        // A derived override beats everything.
        let derived = UploadOptions::new().public_id_fn(|_req, file| {
            format!("derived/{}", file.original_name.as_deref().unwrap_or("anon"))
        });
        let plan = translate(&config, &request(), &report(), &derived);
        assert_eq!(plan.key, "derived/report.pdf");
    }

    #[test]
    fn test_translate_chunk_size_becomes_part_size() {
        let options = UploadOptions::new().chunk_size(8 * 1024 * 1024).queue_size(2);
        let plan = translate(&S3Config::new("uploads"), &request(), &report(), &options);
        assert_eq!(plan.part_size, 8 * 1024 * 1024);
        assert_eq!(plan.queue_size, 2);
    }

    #[test]
    fn test_translate_encodes_tagging() {
        let options = UploadOptions::new()
            .tag("team", "data platform")
            .tag("env", "prod");
        let plan = translate(&S3Config::new("uploads"), &request(), &report(), &options);
        assert_eq!(
            plan.tagging.as_deref(),
            Some("team=data%20platform&env=prod")
        );
    }

    #[test]
    fn test_translate_does_not_mutate_config() {
        let config = S3Config::new("uploads")
            .metadata("origin", "relay")
            .content_type("text/plain");
        let before = config.clone();

        let options = UploadOptions::new().public_id("other").chunk_size(1);
        let _ = translate(&config, &request(), &report(), &options);

        assert_eq!(config.bucket, before.bucket);
        assert_eq!(config.key, before.key);
        assert_eq!(config.content_type, before.content_type);
        assert_eq!(config.metadata, before.metadata);
    }

    #[test]
    fn test_normalize_echoes_plan_fields() {
        let plan = translate(
            &S3Config::new("uploads").metadata("origin", "relay"),
            &request(),
            &report(),
            &UploadOptions::new(),
        );
        let receipt = S3TransferReceipt {
            location: Some("https://uploads.s3.amazonaws.com/report.pdf".into()),
            bucket: Some("uploads".into()),
            key: Some("report.pdf".into()),
            etag: Some("\"abc\"".into()),
            version_id: Some("v1".into()),
            server_side_encryption: Some("AES256".into()),
        };

        let outcome = normalize(&receipt, &plan, "unused-fallback".into());
        assert_eq!(outcome.filename, "report.pdf");
        assert_eq!(
            outcome.path.as_deref(),
            Some("https://uploads.s3.amazonaws.com/report.pdf")
        );
        assert_eq!(outcome.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            outcome.metadata.as_ref().and_then(|m| m.get("origin")).map(String::as_str),
            Some("relay")
        );
        assert_eq!(outcome.encryption.as_deref(), Some("AES256"));
        // Not reported by this backend.
        assert!(outcome.size.is_none());
        assert!(outcome.storage_class.is_none());
    }

    #[test]
    fn test_normalize_falls_back_to_constructed_location() {
        let plan = translate(
            &S3Config::new("uploads"),
            &request(),
            &report(),
            &UploadOptions::new(),
        );
        let receipt = S3TransferReceipt::default();

        let outcome = normalize(&receipt, &plan, "https://minio.local/uploads/report.pdf".into());
        assert_eq!(
            outcome.path.as_deref(),
            Some("https://minio.local/uploads/report.pdf")
        );
        assert_eq!(outcome.bucket.as_deref(), Some("uploads"));
        assert_eq!(outcome.filename, "report.pdf");
    }

    #[tokio::test]
    async fn test_read_part_stops_at_limit_and_eof() {
        let mut reader: FileReader = Box::new(std::io::Cursor::new(vec![7u8; 10]));

        let part = read_part(&mut reader, 4).await.unwrap();
        assert_eq!(part.len(), 4);
        let part = read_part(&mut reader, 4).await.unwrap();
        assert_eq!(part.len(), 4);
        let part = read_part(&mut reader, 4).await.unwrap();
        assert_eq!(part.len(), 2);
        let part = read_part(&mut reader, 4).await.unwrap();
        assert!(part.is_empty());
    }
}
