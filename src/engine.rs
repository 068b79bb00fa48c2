//! The adapter façade: validation, dispatch, and the rejection path.

use http::request::Parts;
use tracing::debug;

use crate::backend::{Backend, BackendKind, StorageTarget};
use crate::{IncomingFile, Result, UploadOptions, UploadOutcome};

/// Storage adapter for a single configured backend.
///
/// Constructed once per deployment; the backend handle and options are
/// immutable afterwards, so one instance can serve any number of concurrent
/// uploads (wrap it in an [`Arc`](std::sync::Arc) to share).
///
/// Every call produces exactly one outcome: a normalized success record,
/// a synthetic rejection record, or an error.
pub struct RemoteStorage {
    backend: Box<dyn Backend>,
    options: UploadOptions,
}

impl RemoteStorage {
    /// Create an adapter over an already-built backend.
    pub fn new(backend: impl Backend + 'static, options: UploadOptions) -> Self {
        Self {
            backend: Box::new(backend),
            options,
        }
    }

    /// Create an adapter from a backend selection.
    pub async fn connect(target: StorageTarget, options: UploadOptions) -> Result<Self> {
        let backend = target.into_backend().await?;
        Ok(Self { backend, options })
    }

    /// The configured backend's identity.
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The configured options.
    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Handle one inbound file: validate, then transfer and normalize, or
    /// drain and reject.
    ///
    /// The validator runs before any network activity. A passing upload is
    /// stored by the backend and resolves to its normalized outcome. A
    /// rejected upload never touches the backend: the stream is drained into
    /// a per-call discard sink and the synthetic zero-size outcome is
    /// returned. A validator error fails the call with that error,
    /// unmodified, before any transfer.
    pub async fn handle_file(&self, req: &Parts, file: IncomingFile) -> Result<UploadOutcome> {
        if let Some(validator) = &self.options.validator {
            let accepted = validator(req, file.info())?;
            if !accepted {
                debug!(
                    file = file.info().original_name.as_deref().unwrap_or(""),
                    "Upload rejected by validator"
                );
                return self.discard(file).await;
            }
        }

        self.backend.store(req, file, &self.options).await
    }

    /// Remove a stored file by its destination identifier.
    ///
    /// Dispatches straight to the backend; removing an already-absent file
    /// is not an error.
    pub async fn remove_file(&self, filename: &str) -> Result<()> {
        self.backend.remove(filename).await
    }

    /// Drain a rejected upload.
    ///
    /// The stream is always consumed to completion so the caller's
    /// connection is never left half-open. The sink is a uniquely named
    /// temporary file, removed when the handle drops; every sink failure is
    /// swallowed and the drain falls back to a null sink.
    async fn discard(&self, file: IncomingFile) -> Result<UploadOutcome> {
        let mut reader = file.into_reader();
        let trash_dir = self
            .options
            .trash
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        match tempfile::NamedTempFile::new_in(&trash_dir) {
            Ok(sink) => match sink.reopen() {
                Ok(sink_file) => {
                    let mut sink_file = tokio::fs::File::from_std(sink_file);
                    if let Err(e) = tokio::io::copy(&mut reader, &mut sink_file).await {
                        debug!(error = %e, "Discard sink write failed; draining to null");
                        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Could not reopen discard sink; draining to null");
                    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                }
            },
            Err(e) => {
                debug!(error = %e, "Could not create discard sink; draining to null");
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
            }
        }
        // The sink handle is gone (and its file removed) before the outcome
        // is reported.

        Ok(UploadOutcome::rejected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileInfo, StorageError, ValidationError};
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Reader that records whether it was consumed to EOF.
    struct TrackedReader {
        inner: Cursor<Vec<u8>>,
        drained: Arc<AtomicBool>,
    }

    impl TrackedReader {
        fn new(data: Vec<u8>) -> (Self, Arc<AtomicBool>) {
            let drained = Arc::new(AtomicBool::new(false));
            (
                Self {
                    inner: Cursor::new(data),
                    drained: drained.clone(),
                },
                drained,
            )
        }
    }

    impl AsyncRead for TrackedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let before = buf.filled().len();
            let me = &mut *self;
            match Pin::new(&mut me.inner).poll_read(cx, buf) {
                Poll::Ready(Ok(())) => {
                    if buf.filled().len() == before {
                        me.drained.store(true, Ordering::SeqCst);
                    }
                    Poll::Ready(Ok(()))
                }
                other => other,
            }
        }
    }

    struct MockBackend {
        stored: Arc<AtomicUsize>,
        removed: Arc<Mutex<Vec<String>>>,
    }

    impl MockBackend {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
            let stored = Arc::new(AtomicUsize::new(0));
            let removed = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    stored: stored.clone(),
                    removed: removed.clone(),
                },
                stored,
                removed,
            )
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::S3
        }

        async fn store(
            &self,
            _req: &Parts,
            file: IncomingFile,
            _options: &UploadOptions,
        ) -> Result<UploadOutcome> {
            self.stored.fetch_add(1, Ordering::SeqCst);
            let mut reader = file.into_reader();
            let mut sink = tokio::io::sink();
            let size = tokio::io::copy(&mut reader, &mut sink).await?;
            let mut outcome = UploadOutcome::new("stored.bin");
            outcome.size = Some(size);
            Ok(outcome)
        }

        async fn remove(&self, filename: &str) -> Result<()> {
            self.removed.lock().unwrap().push(filename.to_string());
            Ok(())
        }
    }

    fn request() -> Parts {
        let (parts, _) = http::Request::builder()
            .uri("/upload")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn tracked_file(name: &str, bytes: usize) -> (IncomingFile, Arc<AtomicBool>) {
        let (reader, drained) = TrackedReader::new(vec![1u8; bytes]);
        let info = FileInfo {
            original_name: Some(name.to_string()),
            declared_size: Some(bytes as u64),
            ..Default::default()
        };
        (IncomingFile::from_reader(info, reader), drained)
    }

    #[tokio::test]
    async fn test_passing_upload_is_stored_once() {
        let (backend, stored, _) = MockBackend::new();
        let storage = RemoteStorage::new(
            backend,
            UploadOptions::new().validator(|_req, _file| Ok(true)),
        );

        let (file, drained) = tracked_file("a.bin", 256);
        let outcome = storage.handle_file(&request(), file).await.unwrap();

        assert_eq!(stored.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.filename, "stored.bin");
        assert_eq!(outcome.size, Some(256));
        assert!(drained.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejected_upload_never_reaches_backend() {
        let (backend, stored, _) = MockBackend::new();
        let trash = tempfile::tempdir().unwrap();
        let storage = RemoteStorage::new(
            backend,
            UploadOptions::new()
                .trash(trash.path())
                .validator(|_req, _file| Ok(false)),
        );

        let (file, drained) = tracked_file("blocked.bin", 4096);
        let outcome = storage.handle_file(&request(), file).await.unwrap();

        // No transfer, stream fully consumed, sentinel outcome.
        assert_eq!(stored.load(Ordering::SeqCst), 0);
        assert!(drained.load(Ordering::SeqCst));
        assert_eq!(outcome.filename, "/");
        assert_eq!(outcome.size, Some(0));
        assert!(outcome.path.is_none());

        // The scoped sink is gone by the time the outcome is reported.
        assert_eq!(std::fs::read_dir(trash.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_survives_unusable_trash_dir() {
        let (backend, stored, _) = MockBackend::new();
        let storage = RemoteStorage::new(
            backend,
            UploadOptions::new()
                .trash("/nonexistent/discard/location")
                .validator(|_req, _file| Ok(false)),
        );

        let (file, drained) = tracked_file("blocked.bin", 1024);
        let outcome = storage.handle_file(&request(), file).await.unwrap();

        assert_eq!(stored.load(Ordering::SeqCst), 0);
        assert!(drained.load(Ordering::SeqCst));
        assert!(outcome.is_rejected());
    }

    #[tokio::test]
    async fn test_validator_error_fails_without_transfer() {
        let (backend, stored, _) = MockBackend::new();
        let storage = RemoteStorage::new(
            backend,
            UploadOptions::new().validator(|_req, _file| {
                Err(StorageError::Validation(ValidationError::custom(
                    "lookup failed",
                )))
            }),
        );

        let (file, _) = tracked_file("a.bin", 16);
        let err = storage.handle_file(&request(), file).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(stored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_validator_means_every_upload_passes() {
        let (backend, stored, _) = MockBackend::new();
        let storage = RemoteStorage::new(backend, UploadOptions::new());

        let (file, _) = tracked_file("a.bin", 16);
        storage.handle_file(&request(), file).await.unwrap();
        assert_eq!(stored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_dispatches_and_is_repeatable() {
        let (backend, _, removed) = MockBackend::new();
        let storage = RemoteStorage::new(backend, UploadOptions::new());

        storage.remove_file("report.pdf").await.unwrap();
        storage.remove_file("report.pdf").await.unwrap();

        let removed = removed.lock().unwrap();
        assert_eq!(removed.as_slice(), ["report.pdf", "report.pdf"]);
    }
}
