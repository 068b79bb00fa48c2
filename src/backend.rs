//! Backend identity, classification, and the polymorphic backend interface.

use async_trait::async_trait;
use http::request::Parts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::{IncomingFile, Result, StorageError, UploadOptions, UploadOutcome};

/// The closed set of supported storage backends.
///
/// Fixed at adapter construction; never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Media CDN with a Cloudinary-style upload API.
    MediaCdn,
    /// Google Cloud Storage.
    Gcs,
    /// S3-compatible object store.
    S3,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MediaCdn => f.write_str("media-cdn"),
            Self::Gcs => f.write_str("gcs"),
            Self::S3 => f.write_str("s3"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cloudinary" | "media-cdn" => Ok(Self::MediaCdn),
            "gcs" | "google-cloud-storage" => Ok(Self::Gcs),
            "s3" | "aws-s3" => Ok(Self::S3),
            other => Err(StorageError::UnrecognizedBackend(other.to_string())),
        }
    }
}

/// A storage backend: one variant per supported service, selected once at
/// construction and invoked uniformly thereafter.
///
/// Implementations are internally structured as translate (pure option
/// mapping), transfer (stream driving), and normalize (pure response
/// mapping).
#[async_trait]
pub trait Backend: Send + Sync {
    /// The backend's identity tag.
    fn kind(&self) -> BackendKind;

    /// Drive the inbound stream into the backend and return the normalized
    /// outcome. Errors carry the backend-native failure unmodified.
    async fn store(
        &self,
        req: &Parts,
        file: IncomingFile,
        options: &UploadOptions,
    ) -> Result<UploadOutcome>;

    /// Remove a stored file by its destination identifier. Idempotent:
    /// removing an absent file succeeds.
    async fn remove(&self, filename: &str) -> Result<()>;
}

/// Deserializable backend selection: an optional explicit tag plus one
/// configuration section per backend.
#[derive(Debug, Default, Deserialize)]
pub struct StorageTarget {
    /// Explicit backend tag. Strongly preferred over shape inference.
    #[serde(default)]
    pub backend: Option<BackendKind>,
    /// Media CDN configuration.
    #[cfg(feature = "media-cdn")]
    #[serde(default)]
    pub cloudinary: Option<crate::cloudinary::CloudinaryConfig>,
    /// Google Cloud Storage configuration.
    #[cfg(feature = "gcs")]
    #[serde(default)]
    pub gcs: Option<crate::gcs::GcsConfig>,
    /// S3 configuration.
    #[cfg(feature = "s3")]
    #[serde(default)]
    pub s3: Option<crate::s3::S3Config>,
}

impl StorageTarget {
    /// Determine the backend identity for this target.
    ///
    /// An explicit tag wins and must have a matching configuration section.
    /// Without a tag, a single present section selects the backend — a
    /// deprecated fallback, logged at WARN. No section, or more than one
    /// without a tag, is a fatal construction error.
    pub fn classify(&self) -> Result<BackendKind> {
        if let Some(kind) = self.backend {
            if self.section_present(kind) {
                return Ok(kind);
            }
            return Err(StorageError::Config(format!(
                "backend `{kind}` selected but its configuration section is missing"
            )));
        }

        let mut present = Vec::new();
        #[cfg(feature = "media-cdn")]
        if self.cloudinary.is_some() {
            present.push(BackendKind::MediaCdn);
        }
        #[cfg(feature = "gcs")]
        if self.gcs.is_some() {
            present.push(BackendKind::Gcs);
        }
        #[cfg(feature = "s3")]
        if self.s3.is_some() {
            present.push(BackendKind::S3);
        }

        match present.as_slice() {
            [kind] => {
                warn!(
                    backend = %kind,
                    "backend classified from configuration shape; set an explicit `backend` tag"
                );
                Ok(*kind)
            }
            [] => Err(StorageError::UnrecognizedBackend(
                "no backend configuration present".to_string(),
            )),
            _ => Err(StorageError::UnrecognizedBackend(
                "multiple backend configurations present without an explicit tag".to_string(),
            )),
        }
    }

    fn section_present(&self, kind: BackendKind) -> bool {
        match kind {
            #[cfg(feature = "media-cdn")]
            BackendKind::MediaCdn => self.cloudinary.is_some(),
            #[cfg(feature = "gcs")]
            BackendKind::Gcs => self.gcs.is_some(),
            #[cfg(feature = "s3")]
            BackendKind::S3 => self.s3.is_some(),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// Build the selected backend.
    pub async fn into_backend(self) -> Result<Box<dyn Backend>> {
        let kind = self.classify()?;
        match kind {
            #[cfg(feature = "media-cdn")]
            BackendKind::MediaCdn => {
                let config = self.cloudinary.ok_or_else(|| {
                    StorageError::Config("media CDN configuration missing".to_string())
                })?;
                Ok(Box::new(crate::cloudinary::CloudinaryBackend::new(config)?))
            }
            #[cfg(feature = "gcs")]
            BackendKind::Gcs => {
                let config = self.gcs.ok_or_else(|| {
                    StorageError::Config("GCS configuration missing".to_string())
                })?;
                Ok(Box::new(crate::gcs::GcsBackend::new(config).await?))
            }
            #[cfg(feature = "s3")]
            BackendKind::S3 => {
                let config = self.s3.ok_or_else(|| {
                    StorageError::Config("S3 configuration missing".to_string())
                })?;
                Ok(Box::new(crate::s3::S3Backend::new(config).await?))
            }
            #[allow(unreachable_patterns)]
            other => Err(StorageError::UnrecognizedBackend(format!(
                "backend `{other}` support is not compiled in"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_parsing() {
        assert_eq!("cloudinary".parse::<BackendKind>().unwrap(), BackendKind::MediaCdn);
        assert_eq!("media-cdn".parse::<BackendKind>().unwrap(), BackendKind::MediaCdn);
        assert_eq!("GCS".parse::<BackendKind>().unwrap(), BackendKind::Gcs);
        assert_eq!("aws-s3".parse::<BackendKind>().unwrap(), BackendKind::S3);

        let err = "ftp".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, StorageError::UnrecognizedBackend(_)));
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_explicit_tag_wins() {
        let target = StorageTarget {
            backend: Some(BackendKind::S3),
            s3: Some(crate::s3::S3Config::new("uploads")),
            ..Default::default()
        };
        assert_eq!(target.classify().unwrap(), BackendKind::S3);
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_tag_without_section_is_fatal() {
        let target = StorageTarget {
            backend: Some(BackendKind::S3),
            ..Default::default()
        };
        assert!(matches!(
            target.classify().unwrap_err(),
            StorageError::Config(_)
        ));
    }

    #[cfg(feature = "gcs")]
    #[test]
    fn test_single_section_is_inferred() {
        let target = StorageTarget {
            gcs: Some(crate::gcs::GcsConfig::new("uploads")),
            ..Default::default()
        };
        assert_eq!(target.classify().unwrap(), BackendKind::Gcs);
    }

    #[test]
    fn test_empty_target_is_unrecognized() {
        let target = StorageTarget::default();
        assert!(matches!(
            target.classify().unwrap_err(),
            StorageError::UnrecognizedBackend(_)
        ));
    }

    #[cfg(all(feature = "s3", feature = "gcs"))]
    #[test]
    fn test_ambiguous_target_is_unrecognized() {
        let target = StorageTarget {
            s3: Some(crate::s3::S3Config::new("uploads")),
            gcs: Some(crate::gcs::GcsConfig::new("uploads")),
            ..Default::default()
        };
        assert!(matches!(
            target.classify().unwrap_err(),
            StorageError::UnrecognizedBackend(_)
        ));
    }
}
