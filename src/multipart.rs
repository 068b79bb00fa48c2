//! Multipart form bridge.
//!
//! Thin streaming bridge from a multipart request body to per-file
//! [`IncomingFile`]s, for hosts whose middleware hands the adapter a raw
//! body instead of pre-parsed files.

use bytes::Bytes;
use futures::Stream;

use crate::{IncomingFile, Result, StorageError};

/// Multipart form parser yielding one streaming [`IncomingFile`] per file
/// field.
///
/// Fields are delivered in order; each yielded file must be processed to
/// completion before requesting the next one.
#[derive(Debug)]
pub struct Multipart {
    inner: multer::Multipart<'static>,
}

impl Multipart {
    /// Create a parser from a body stream and boundary.
    pub fn with_boundary<S>(stream: S, boundary: &str) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self {
            inner: multer::Multipart::new(stream, boundary),
        }
    }

    /// Create a parser from a `Content-Type` header value and a body stream.
    pub fn from_request<S>(content_type: &str, body: S) -> Result<Self>
    where
        S: Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static,
    {
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| StorageError::Multipart(e.to_string()))?;

        Ok(Self::with_boundary(body, &boundary))
    }

    /// Get the next file field as a streaming [`IncomingFile`].
    ///
    /// Non-file fields are drained and skipped. Returns `None` when the form
    /// is exhausted.
    pub async fn next_file(&mut self) -> Result<Option<IncomingFile>> {
        while let Some(mut field) = self.inner.next_field().await? {
            if field.file_name().is_some() {
                return Ok(Some(IncomingFile::from_multer_field(field)));
            }
            // A field must be consumed before the parser can move on.
            while field.chunk().await?.is_some() {}
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn body_stream(body: &'static str) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
        futures::stream::once(async move { Ok(Bytes::from_static(body.as_bytes())) })
    }

    #[tokio::test]
    async fn test_yields_file_fields_and_skips_text_fields() {
        let body = "--BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"caption\"\r\n\r\n\
                    a plain field\r\n\
                    --BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n\
                    Content-Type: text/plain\r\n\r\n\
                    hello world\r\n\
                    --BOUNDARY--\r\n";

        let mut multipart = Multipart::with_boundary(body_stream(body), "BOUNDARY");

        let file = multipart.next_file().await.unwrap().expect("one file field");
        assert_eq!(file.info().field_name.as_deref(), Some("file"));
        assert_eq!(file.info().original_name.as_deref(), Some("hello.txt"));
        assert_eq!(file.info().content_type_str().as_deref(), Some("text/plain"));

        let mut content = Vec::new();
        file.into_reader().read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"hello world");

        assert!(multipart.next_file().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_content_type_is_a_multipart_error() {
        let err = Multipart::from_request("text/plain", body_stream("")).unwrap_err();
        assert!(matches!(err, StorageError::Multipart(_)));
    }
}
