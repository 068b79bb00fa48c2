//! Upload gate rules.
//!
//! Rules run against the declared file metadata before any byte of the
//! stream is consumed, so they can only inspect what the caller declared.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::{FileInfo, ValidatorFn};

/// Validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Declared size exceeds the limit.
    #[error("File too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge {
        /// Declared size.
        size: u64,
        /// Maximum size.
        max: u64,
    },

    /// Declared MIME type not allowed.
    #[error("File type not allowed: {mime_type}")]
    TypeNotAllowed {
        /// The disallowed MIME type.
        mime_type: String,
    },

    /// File extension not allowed.
    #[error("File extension not allowed: {extension}")]
    ExtensionNotAllowed {
        /// The disallowed extension.
        extension: String,
    },

    /// File name is required but missing.
    #[error("File name is required")]
    NameRequired,

    /// Custom validation failed.
    #[error("Validation failed: {0}")]
    Custom(String),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// A gate rule for inbound files.
pub trait GateRule: Send + Sync {
    /// Check a file's declared metadata.
    fn check(&self, file: &FileInfo) -> Result<(), ValidationError>;

    /// Rule description for log messages.
    fn description(&self) -> &str;
}

/// Rule-based upload gate.
///
/// Converts into the validator predicate consumed by
/// [`UploadOptions`](crate::UploadOptions): a failing rule rejects the
/// upload, it does not error the call.
#[derive(Default)]
pub struct FileGate {
    rules: Vec<Box<dyn GateRule>>,
}

impl FileGate {
    /// Create a new gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gate rule.
    pub fn rule(mut self, rule: impl GateRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Set the maximum declared file size.
    pub fn max_declared_size(self, bytes: u64) -> Self {
        self.rule(MaxDeclaredSizeRule(bytes))
    }

    /// Set allowed MIME types.
    pub fn allowed_types(self, types: &[&str]) -> Self {
        self.rule(AllowedTypesRule(
            types.iter().map(|s| s.to_string()).collect(),
        ))
    }

    /// Set allowed file extensions.
    pub fn allowed_extensions(self, extensions: &[&str]) -> Self {
        self.rule(AllowedExtensionsRule(
            extensions.iter().map(|s| s.to_lowercase()).collect(),
        ))
    }

    /// Require a file name.
    pub fn require_name(self) -> Self {
        self.rule(RequireNameRule)
    }

    /// Only allow images.
    pub fn images_only(self) -> Self {
        self.allowed_types(&[
            "image/jpeg",
            "image/png",
            "image/gif",
            "image/webp",
            "image/svg+xml",
        ])
    }

    /// Add a custom rule.
    pub fn custom<F>(self, name: &str, check: F) -> Self
    where
        F: Fn(&FileInfo) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rule(CustomRule {
            name: name.to_string(),
            check: Box::new(check),
        })
    }

    /// Check a file against every rule, reporting the first failure.
    pub fn check(&self, file: &FileInfo) -> Result<(), ValidationError> {
        for rule in &self.rules {
            rule.check(file)?;
        }
        Ok(())
    }

    /// Convert into a validator predicate for upload options.
    pub fn into_validator(self) -> ValidatorFn {
        Arc::new(move |_req, file| {
            if let Err(reason) = self.check(file) {
                debug!(%reason, "upload rejected by gate");
                return Ok(false);
            }
            Ok(true)
        })
    }
}

// Built-in gate rules

struct MaxDeclaredSizeRule(u64);

impl GateRule for MaxDeclaredSizeRule {
    fn check(&self, file: &FileInfo) -> Result<(), ValidationError> {
        if let Some(size) = file.declared_size
            && size > self.0
        {
            return Err(ValidationError::TooLarge { size, max: self.0 });
        }
        Ok(())
    }

    fn description(&self) -> &str {
        "Maximum declared file size"
    }
}

struct AllowedTypesRule(HashSet<String>);

impl GateRule for AllowedTypesRule {
    fn check(&self, file: &FileInfo) -> Result<(), ValidationError> {
        if let Some(mime) = &file.content_type {
            let mime_str = mime.essence_str().to_string();
            if !self.0.contains(&mime_str) && !self.0.contains(&format!("{}/*", mime.type_())) {
                return Err(ValidationError::TypeNotAllowed { mime_type: mime_str });
            }
        }
        Ok(())
    }

    fn description(&self) -> &str {
        "Allowed MIME types"
    }
}

struct AllowedExtensionsRule(HashSet<String>);

impl GateRule for AllowedExtensionsRule {
    fn check(&self, file: &FileInfo) -> Result<(), ValidationError> {
        if let Some(ext) = file.extension() {
            let ext_lower = ext.to_lowercase();
            if !self.0.contains(&ext_lower) {
                return Err(ValidationError::ExtensionNotAllowed { extension: ext });
            }
        }
        Ok(())
    }

    fn description(&self) -> &str {
        "Allowed file extensions"
    }
}

struct RequireNameRule;

impl GateRule for RequireNameRule {
    fn check(&self, file: &FileInfo) -> Result<(), ValidationError> {
        if file.original_name.is_none() {
            Err(ValidationError::NameRequired)
        } else {
            Ok(())
        }
    }

    fn description(&self) -> &str {
        "Require file name"
    }
}

struct CustomRule {
    name: String,
    check: Box<dyn Fn(&FileInfo) -> Result<(), String> + Send + Sync>,
}

impl GateRule for CustomRule {
    fn check(&self, file: &FileInfo) -> Result<(), ValidationError> {
        (self.check)(file).map_err(ValidationError::Custom)
    }

    fn description(&self) -> &str {
        &self.name
    }
}
