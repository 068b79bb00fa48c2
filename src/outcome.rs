//! Normalized upload outcomes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Destination-identifier sentinel reported for rejected uploads.
pub const REJECTED_FILENAME: &str = "/";

/// The backend-agnostic record returned after a completed upload.
///
/// Fields a backend does not report are left `None` rather than defaulted,
/// so callers can distinguish "not provided" from "empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Destination identifier the file was stored under.
    pub filename: String,
    /// Publicly addressable location, when the backend provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Stored size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Bucket or container the file landed in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Folder within the backend, for backends that report one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Stored content type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Backend-assigned entity tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Custom metadata attached to the stored object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    /// Storage class of the stored object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Creation timestamp reported by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
    /// Backend-assigned version or revision identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Server-side encryption applied, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    /// Pixel width, for media backends that analyze the upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height, for media backends that analyze the upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Upload signature, for media backends that sign responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl UploadOutcome {
    /// Create an outcome for a destination identifier.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// The synthetic zero-size outcome reported for a rejected upload.
    ///
    /// The location stays unset and the destination identifier is the
    /// rejection sentinel.
    pub fn rejected() -> Self {
        Self {
            filename: REJECTED_FILENAME.to_string(),
            size: Some(0),
            ..Default::default()
        }
    }

    /// Check whether this outcome records a rejected upload.
    pub fn is_rejected(&self) -> bool {
        self.filename == REJECTED_FILENAME && self.path.is_none()
    }
}
