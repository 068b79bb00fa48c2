//! Backend-agnostic upload options.

use http::request::Parts;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{FileInfo, Result};

/// Validator predicate invoked before any transfer.
///
/// `Ok(true)` lets the upload proceed, `Ok(false)` rejects it into the
/// discard sink, `Err` fails the call with the error surfaced unmodified.
pub type ValidatorFn = Arc<dyn Fn(&Parts, &FileInfo) -> Result<bool> + Send + Sync>;

/// Function deriving a destination identifier from the request and file.
pub type KeyDeriveFn = Arc<dyn Fn(&Parts, &FileInfo) -> String + Send + Sync>;

/// Destination-identifier override.
#[derive(Clone)]
pub enum KeyOverride {
    /// A literal destination identifier, used as-is.
    Literal(String),
    /// Derived per call from the request and file descriptor.
    Derive(KeyDeriveFn),
}

impl KeyOverride {
    /// Derive the destination identifier for one call.
    pub fn resolve(&self, req: &Parts, file: &FileInfo) -> String {
        match self {
            Self::Literal(key) => key.clone(),
            Self::Derive(derive) => derive(req, file),
        }
    }
}

impl From<String> for KeyOverride {
    fn from(key: String) -> Self {
        Self::Literal(key)
    }
}

impl From<&str> for KeyOverride {
    fn from(key: &str) -> Self {
        Self::Literal(key.to_string())
    }
}

impl fmt::Debug for KeyOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(key) => f.debug_tuple("Literal").field(key).finish(),
            Self::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}

/// Behavioral options shared by all backends.
///
/// Built once per adapter; translated into each backend's native upload
/// arguments fresh on every call (derived overrides depend on the request,
/// so translations are never cached).
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Transfer chunk size override, copied into the backend-native chunking
    /// field (media CDN chunk size, blob-store buffering hint, object-store
    /// part size).
    pub chunk_size: Option<usize>,
    /// Destination-identifier override; literal or derived.
    pub public_id: Option<KeyOverride>,
    /// Directory for per-call discard sinks on the rejection path.
    /// Defaults to the system temp directory.
    pub trash: Option<PathBuf>,
    /// Validator predicate gating every upload.
    pub validator: Option<ValidatorFn>,
    /// Object-store-only: tag set applied to the stored object.
    pub tags: Vec<(String, String)>,
    /// Object-store-only: concurrent in-flight parts during multipart upload.
    pub queue_size: Option<usize>,
    /// Object-store-only: keep already-uploaded parts when a transfer fails.
    pub leave_parts_on_error: bool,
}

impl UploadOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transfer chunk size.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    /// Set a literal destination-identifier override.
    pub fn public_id(mut self, key: impl Into<KeyOverride>) -> Self {
        self.public_id = Some(key.into());
        self
    }

    /// Set a derived destination-identifier override.
    pub fn public_id_fn<F>(mut self, derive: F) -> Self
    where
        F: Fn(&Parts, &FileInfo) -> String + Send + Sync + 'static,
    {
        self.public_id = Some(KeyOverride::Derive(Arc::new(derive)));
        self
    }

    /// Set the discard-sink directory.
    pub fn trash(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trash = Some(dir.into());
        self
    }

    /// Set the validator predicate.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Parts, &FileInfo) -> Result<bool> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Add an object tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Set the multipart upload concurrency.
    pub fn queue_size(mut self, parts: usize) -> Self {
        self.queue_size = Some(parts);
        self
    }

    /// Keep uploaded parts when a multipart transfer fails.
    pub fn leave_parts_on_error(mut self) -> Self {
        self.leave_parts_on_error = true;
        self
    }

    /// Resolve the destination-identifier override for one call, if any.
    pub(crate) fn resolve_key(&self, req: &Parts, file: &FileInfo) -> Option<String> {
        self.public_id.as_ref().map(|key| key.resolve(req, file))
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("chunk_size", &self.chunk_size)
            .field("public_id", &self.public_id)
            .field("trash", &self.trash)
            .field("validator", &self.validator.as_ref().map(|_| ".."))
            .field("tags", &self.tags)
            .field("queue_size", &self.queue_size)
            .field("leave_parts_on_error", &self.leave_parts_on_error)
            .finish()
    }
}
