//! Streaming upload relay for remote object storage.
//!
//! This crate sits between an upload-handling middleware and a remote
//! storage service: it takes one inbound file stream per call, forwards it
//! to the configured backend, and returns one normalized metadata record.
//! It also exposes the symmetric delete and a reject-and-discard path for
//! uploads that fail application-level validation.
//!
//! # Features
//!
//! - **Closed backend set** - media CDN (`media-cdn`), Google Cloud Storage
//!   (`gcs`), S3-compatible object stores (`s3`), selected once at
//!   construction
//! - **Streaming transfers** - chunked/streamed writes and managed
//!   multipart uploads, never buffering whole files
//! - **Normalized outcomes** - one response shape across heterogeneous
//!   backend payloads
//! - **Validation gate** - reject uploads before they touch the network
//! - **Multipart bridge** - stream files straight out of a multipart body
//!
//! # Quick Start
//!
//! ```no_run
//! use relay_storage::{IncomingFile, RemoteStorage, S3Backend, S3Config, UploadOptions};
//!
//! # async fn example(req: http::request::Parts) -> Result<(), relay_storage::StorageError> {
//! let backend = S3Backend::new(S3Config::new("uploads").region("eu-west-1")).await?;
//! let storage = RemoteStorage::new(backend, UploadOptions::new());
//!
//! let file = IncomingFile::from_bytes("hello", "greeting.txt");
//! let outcome = storage.handle_file(&req, file).await?;
//! println!("stored at {:?}", outcome.path);
//!
//! storage.remove_file(&outcome.filename).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod content_type;
pub mod engine;
pub mod error;
pub mod file;
pub mod multipart;
pub mod options;
pub mod outcome;
pub mod validation;

#[cfg(feature = "media-cdn")]
pub mod cloudinary;

#[cfg(feature = "gcs")]
pub mod gcs;

#[cfg(feature = "s3")]
pub mod s3;

pub use backend::*;
pub use engine::*;
pub use error::*;
pub use file::*;
pub use multipart::*;
pub use options::*;
pub use outcome::*;
pub use validation::*;

#[cfg(feature = "media-cdn")]
pub use cloudinary::{CloudinaryBackend, CloudinaryConfig, CloudinaryParams, CloudinaryResponse};

#[cfg(feature = "gcs")]
pub use gcs::{GcsBackend, GcsConfig, GcsWritePlan};

#[cfg(feature = "s3")]
pub use s3::{S3Backend, S3Config, S3TransferReceipt, S3UploadPlan};
