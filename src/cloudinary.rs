//! Media CDN backend (Cloudinary-style upload API).
//!
//! The service has no official Rust SDK; this backend speaks its REST
//! surface directly: signed multipart uploads, ranged chunk uploads for
//! large payloads, and the destroy endpoint for deletes.

use async_trait::async_trait;
use http::request::Parts;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{Backend, BackendKind};
use crate::file::FileReader;
use crate::{FileInfo, IncomingFile, Result, StorageError, UploadOptions, UploadOutcome};

const DEFAULT_UPLOAD_PREFIX: &str = "https://api.cloudinary.com";

fn default_resource_type() -> String {
    "auto".to_string()
}

/// Media CDN account configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryConfig {
    /// Account cloud name.
    pub cloud_name: String,
    /// API key.
    pub api_key: String,
    /// API secret used for request signing.
    pub api_secret: String,
    /// Custom API endpoint prefix.
    #[serde(default)]
    pub upload_prefix: Option<String>,
    /// Resource type segment of the upload endpoint.
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    /// Static upload parameters applied to every call.
    #[serde(default)]
    pub params: CloudinaryParams,
}

impl CloudinaryConfig {
    /// Create configuration for an account.
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            upload_prefix: None,
            resource_type: default_resource_type(),
            params: CloudinaryParams::default(),
        }
    }

    /// Set a custom API endpoint prefix.
    pub fn upload_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.upload_prefix = Some(prefix.into());
        self
    }

    /// Set the resource type.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Set the static upload parameters.
    pub fn params(mut self, params: CloudinaryParams) -> Self {
        self.params = params;
        self
    }
}

/// Native upload parameters for the media CDN.
///
/// The static parameter bag configured on the adapter; per-call overrides
/// are flat-merged on top of a copy of it. `chunk_size` controls client-side
/// chunking and is never sent to the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudinaryParams {
    /// Explicit public id for the stored asset.
    #[serde(default)]
    pub public_id: Option<String>,
    /// Destination folder.
    #[serde(default)]
    pub folder: Option<String>,
    /// Named upload preset.
    #[serde(default)]
    pub upload_preset: Option<String>,
    /// Comma-separated tag list.
    #[serde(default)]
    pub tags: Option<String>,
    /// Contextual metadata, `key=value` pairs joined with `|`.
    #[serde(default)]
    pub context: Option<String>,
    /// Overwrite an existing asset with the same public id.
    #[serde(default)]
    pub overwrite: Option<bool>,
    /// Use the original file name as the public id basis.
    #[serde(default)]
    pub use_filename: Option<bool>,
    /// Add a uniqueness suffix when `use_filename` is set.
    #[serde(default)]
    pub unique_filename: Option<bool>,
    /// Client-side chunk size in bytes.
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl CloudinaryParams {
    /// Render the parameters that go on the wire, in stable field order.
    fn to_form_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                fields.push((key.to_string(), value));
            }
        };
        push("public_id", self.public_id.clone());
        push("folder", self.folder.clone());
        push("upload_preset", self.upload_preset.clone());
        push("tags", self.tags.clone());
        push("context", self.context.clone());
        push("overwrite", self.overwrite.map(|v| v.to_string()));
        push("use_filename", self.use_filename.map(|v| v.to_string()));
        push("unique_filename", self.unique_filename.map(|v| v.to_string()));
        fields
    }
}

/// Success payload returned by the upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryResponse {
    /// Public id the asset was stored under.
    pub public_id: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

/// Translate the static parameter bag and per-call overrides into the
/// native upload parameters.
///
/// A flat merge: the chunk-size override lands in `chunk_size`, a
/// destination override replaces `public_id`. The content type is never
/// touched — the service infers it — and an absent override leaves the id
/// service-assigned rather than defaulting to the file name.
pub(crate) fn translate(
    params: &CloudinaryParams,
    req: &Parts,
    file: &FileInfo,
    options: &UploadOptions,
) -> CloudinaryParams {
    let mut translated = params.clone();
    if let Some(chunk_size) = options.chunk_size {
        translated.chunk_size = Some(chunk_size);
    }
    if let Some(key) = options.resolve_key(req, file) {
        translated.public_id = Some(key);
    }
    translated
}

/// Map the upload success payload into the normalized outcome.
pub(crate) fn normalize(payload: &CloudinaryResponse) -> UploadOutcome {
    UploadOutcome {
        filename: payload.public_id.clone(),
        path: payload.secure_url.clone(),
        size: payload.bytes,
        etag: payload.etag.clone(),
        folder: payload.folder.clone(),
        width: payload.width,
        height: payload.height,
        signature: payload.signature.clone(),
        time_created: payload.created_at.clone(),
        version_id: payload
            .version_id
            .clone()
            .or_else(|| payload.version.map(|v| v.to_string())),
        ..Default::default()
    }
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn file_name(info: &FileInfo) -> String {
    info.original_name
        .clone()
        .unwrap_or_else(|| "file".to_string())
}

fn form_from(fields: &[(String, String)]) -> Form {
    let mut form = Form::new();
    for (key, value) in fields {
        form = form.text(key.clone(), value.clone());
    }
    form
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Backend(format!(
        "media CDN request failed with {status}: {body}"
    )))
}

async fn read_chunk(reader: &mut FileReader, limit: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Media CDN storage backend.
pub struct CloudinaryBackend {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryBackend {
    /// Create a new media CDN backend.
    pub fn new(config: CloudinaryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self::from_client(client, config))
    }

    /// Create from an existing HTTP client.
    pub fn from_client(client: reqwest::Client, config: CloudinaryConfig) -> Self {
        info!(cloud_name = %config.cloud_name, "Initialized media CDN storage");
        Self { client, config }
    }

    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        let prefix = self
            .config
            .upload_prefix
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_PREFIX)
            .trim_end_matches('/');
        format!(
            "{}/v1_1/{}/{}/{}",
            prefix, self.config.cloud_name, resource_type, action
        )
    }

    /// Sign a parameter set: sorted `k=v` pairs joined with `&`, the API
    /// secret appended, SHA-256, hex.
    fn sign(&self, fields: &[(String, String)]) -> String {
        let mut pairs: Vec<&(String, String)> = fields.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let joined = pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        let digest = Sha256::digest(format!("{joined}{}", self.config.api_secret).as_bytes());
        hex::encode(digest)
    }

    /// Build the full signed field set for one request series.
    fn signed_fields(&self, params: &[(String, String)]) -> Vec<(String, String)> {
        let mut fields = params.to_vec();
        fields.push(("timestamp".to_string(), unix_timestamp().to_string()));
        let signature = self.sign(&fields);
        fields.push(("api_key".to_string(), self.config.api_key.clone()));
        fields.push(("signature".to_string(), signature));
        fields.push(("signature_algorithm".to_string(), "sha256".to_string()));
        fields
    }

    async fn upload_streamed(
        &self,
        params: &CloudinaryParams,
        info: &FileInfo,
        reader: FileReader,
    ) -> Result<CloudinaryResponse> {
        let fields = self.signed_fields(&params.to_form_fields());
        let part = Part::stream(reqwest::Body::wrap_stream(ReaderStream::new(reader)))
            .file_name(file_name(info));
        let form = form_from(&fields).part("file", part);

        let response = self
            .client
            .post(self.endpoint(&self.config.resource_type, "upload"))
            .multipart(form)
            .send()
            .await
            .map_err(StorageError::transfer)?;
        let response = check_status(response).await?;
        response
            .json::<CloudinaryResponse>()
            .await
            .map_err(StorageError::transfer)
    }

    async fn upload_chunked(
        &self,
        params: &CloudinaryParams,
        info: &FileInfo,
        mut reader: FileReader,
        chunk_size: usize,
    ) -> Result<CloudinaryResponse> {
        let fields = self.signed_fields(&params.to_form_fields());
        let name = file_name(info);
        let url = self.endpoint(&self.config.resource_type, "upload");

        let mut current = read_chunk(&mut reader, chunk_size).await?;
        if current.len() < chunk_size {
            // The whole payload fits in one chunk; a plain upload is equivalent.
            let form = form_from(&fields).part("file", Part::bytes(current).file_name(name));
            let response = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(StorageError::transfer)?;
            let response = check_status(response).await?;
            return response
                .json::<CloudinaryResponse>()
                .await
                .map_err(StorageError::transfer);
        }

        // One upload id correlates the chunk series; the signed fields are
        // reused verbatim on every chunk.
        let upload_id = Uuid::new_v4().simple().to_string();
        let mut offset: u64 = 0;
        loop {
            let next = if current.len() == chunk_size {
                read_chunk(&mut reader, chunk_size).await?
            } else {
                Vec::new()
            };
            let last = next.is_empty();

            let start = offset;
            let end = offset + current.len() as u64 - 1;
            let total = if last {
                (end + 1).to_string()
            } else {
                "-1".to_string()
            };

            let form =
                form_from(&fields).part("file", Part::bytes(current).file_name(name.clone()));
            let response = self
                .client
                .post(&url)
                .header("X-Unique-Upload-Id", &upload_id)
                .header(
                    reqwest::header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total}"),
                )
                .multipart(form)
                .send()
                .await
                .map_err(StorageError::transfer)?;
            let response = check_status(response).await?;

            if last {
                return response
                    .json::<CloudinaryResponse>()
                    .await
                    .map_err(StorageError::transfer);
            }

            offset = end + 1;
            current = next;
        }
    }
}

#[async_trait]
impl Backend for CloudinaryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MediaCdn
    }

    async fn store(
        &self,
        req: &Parts,
        file: IncomingFile,
        options: &UploadOptions,
    ) -> Result<UploadOutcome> {
        let (info, reader) = file.into_parts();
        let translated = translate(&self.config.params, req, &info, options);

        let payload = match translated.chunk_size {
            Some(chunk_size) if chunk_size > 0 => {
                self.upload_chunked(&translated, &info, reader, chunk_size)
                    .await?
            }
            _ => self.upload_streamed(&translated, &info, reader).await?,
        };

        debug!(
            public_id = %payload.public_id,
            bytes = payload.bytes,
            "Uploaded to media CDN"
        );

        Ok(normalize(&payload))
    }

    async fn remove(&self, filename: &str) -> Result<()> {
        let mut fields = vec![
            ("invalidate".to_string(), "true".to_string()),
            ("public_id".to_string(), filename.to_string()),
            ("timestamp".to_string(), unix_timestamp().to_string()),
        ];
        let signature = self.sign(&fields);
        fields.push(("api_key".to_string(), self.config.api_key.clone()));
        fields.push(("signature".to_string(), signature));
        fields.push(("signature_algorithm".to_string(), "sha256".to_string()));

        // Destroy has no "auto" resource type; the service default is image.
        let resource_type = if self.config.resource_type == "auto" {
            "image"
        } else {
            self.config.resource_type.as_str()
        };

        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .multipart(form_from(&fields))
            .send()
            .await
            .map_err(StorageError::delete)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::delete(format!(
                "media CDN destroy failed with {status}: {body}"
            )));
        }

        let payload: DestroyResponse = response.json().await.map_err(StorageError::delete)?;
        match payload.result.as_str() {
            // An already-absent asset is a successful delete.
            "ok" | "not found" => {
                debug!(public_id = %filename, "Deleted from media CDN");
                Ok(())
            }
            other => Err(StorageError::delete(format!(
                "media CDN destroy returned `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Parts {
        let (parts, _) = http::Request::builder()
            .uri("/upload")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn photo() -> FileInfo {
        FileInfo {
            original_name: Some("photo.png".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_translate_without_overrides_keeps_params_unchanged() {
        let params = CloudinaryParams {
            folder: Some("gallery".into()),
            overwrite: Some(true),
            ..Default::default()
        };
        let before = params.clone();
        let options = UploadOptions::new();

        let translated = translate(&params, &request(), &photo(), &options);

        assert_eq!(translated, before);
        assert_eq!(params, before);
        // No destination defaulting: the id stays service-assigned.
        assert!(translated.public_id.is_none());
    }

    #[test]
    fn test_translate_applies_chunk_and_literal_id_overrides() {
        let params = CloudinaryParams {
            public_id: Some("from-params".into()),
            ..Default::default()
        };
        let options = UploadOptions::new()
            .chunk_size(6_000_000)
            .public_id("from-options");

        let translated = translate(&params, &request(), &photo(), &options);

        assert_eq!(translated.chunk_size, Some(6_000_000));
        assert_eq!(translated.public_id.as_deref(), Some("from-options"));
        // The caller-supplied bag is untouched.
        assert_eq!(params.public_id.as_deref(), Some("from-params"));
        assert_eq!(params.chunk_size, None);
    }

    #[test]
    fn test_translate_derived_override_wins() {
        let params = CloudinaryParams::default();
        let options = UploadOptions::new().public_id_fn(|_req, file| {
            format!("derived/{}", file.original_name.as_deref().unwrap_or("anon"))
        });

        let translated = translate(&params, &request(), &photo(), &options);
        assert_eq!(translated.public_id.as_deref(), Some("derived/photo.png"));
    }

    #[test]
    fn test_form_fields_exclude_chunk_size() {
        let params = CloudinaryParams {
            folder: Some("gallery".into()),
            chunk_size: Some(6_000_000),
            ..Default::default()
        };
        let fields = params.to_form_fields();
        assert!(fields.iter().all(|(key, _)| key != "chunk_size"));
        assert!(fields.iter().any(|(key, value)| key == "folder" && value == "gallery"));
    }

    #[test]
    fn test_normalize_maps_success_payload() {
        let payload: CloudinaryResponse = serde_json::from_value(json!({
            "public_id": "sample/photo",
            "version": 171_234_567_u64,
            "signature": "abcdef",
            "width": 800,
            "height": 600,
            "format": "png",
            "created_at": "2024-03-01T10:00:00Z",
            "bytes": 12_345,
            "etag": "e6b1c2",
            "folder": "sample",
            "secure_url": "https://res.example.com/sample/photo.png"
        }))
        .unwrap();

        let outcome = normalize(&payload);
        assert_eq!(outcome.filename, "sample/photo");
        assert_eq!(
            outcome.path.as_deref(),
            Some("https://res.example.com/sample/photo.png")
        );
        assert_eq!(outcome.size, Some(12_345));
        assert_eq!(outcome.etag.as_deref(), Some("e6b1c2"));
        assert_eq!(outcome.width, Some(800));
        assert_eq!(outcome.height, Some(600));
        assert_eq!(outcome.version_id.as_deref(), Some("171234567"));
        assert_eq!(
            outcome.time_created.as_deref(),
            Some("2024-03-01T10:00:00Z")
        );
        // Not reported by this backend.
        assert!(outcome.bucket.is_none());
        assert!(outcome.encryption.is_none());
    }

    #[test]
    fn test_signature_is_order_independent() {
        let backend = CloudinaryBackend::new(CloudinaryConfig::new("demo", "key", "secret"))
            .unwrap();

        let forward = vec![
            ("folder".to_string(), "gallery".to_string()),
            ("public_id".to_string(), "photo".to_string()),
            ("timestamp".to_string(), "1700000000".to_string()),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = backend.sign(&forward);
        let b = backend.sign(&reversed);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let fields = vec![("public_id".to_string(), "photo".to_string())];
        let a = CloudinaryBackend::new(CloudinaryConfig::new("demo", "key", "secret-a"))
            .unwrap()
            .sign(&fields);
        let b = CloudinaryBackend::new(CloudinaryConfig::new("demo", "key", "secret-b"))
            .unwrap()
            .sign(&fields);
        assert_ne!(a, b);
    }

    #[test]
    fn test_endpoint_layout() {
        let backend = CloudinaryBackend::new(
            CloudinaryConfig::new("demo", "key", "secret").upload_prefix("https://cdn.internal/"),
        )
        .unwrap();
        assert_eq!(
            backend.endpoint("image", "upload"),
            "https://cdn.internal/v1_1/demo/image/upload"
        );
    }
}
