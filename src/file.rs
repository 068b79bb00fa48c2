//! Inbound file descriptors.

use bytes::Bytes;
use mime::Mime;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncRead;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Boxed byte source for an inbound upload.
pub type FileReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Metadata describing an inbound file, as declared by the caller.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// Form field name the file arrived under.
    pub field_name: Option<String>,
    /// Original file name as sent by the client.
    pub original_name: Option<String>,
    /// Declared transfer encoding.
    pub encoding: Option<String>,
    /// Declared MIME type.
    pub content_type: Option<Mime>,
    /// Declared size in bytes, when the caller knows it up front.
    pub declared_size: Option<u64>,
}

impl FileInfo {
    /// Get the file extension from the original name.
    pub fn extension(&self) -> Option<String> {
        self.original_name.as_deref().and_then(|name| {
            Path::new(name)
                .extension()
                .map(|e| e.to_string_lossy().to_string())
        })
    }

    /// Get the declared content type as a string.
    pub fn content_type_str(&self) -> Option<String> {
        self.content_type.as_ref().map(|ct| ct.to_string())
    }

    /// Check if the file has an image MIME type.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| ct.type_() == mime::IMAGE)
            .unwrap_or(false)
    }
}

/// An inbound file: declared metadata plus the readable byte stream.
///
/// The caller owns the descriptor; the adapter reads the stream to completion
/// (or drains it on rejection) and never retains it past the call.
pub struct IncomingFile {
    /// Declared file metadata.
    pub info: FileInfo,
    reader: FileReader,
}

impl IncomingFile {
    /// Create from metadata and an async byte source.
    pub fn from_reader(
        info: FileInfo,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
    ) -> Self {
        Self {
            info,
            reader: Box::new(reader),
        }
    }

    /// Create from an in-memory buffer with a file name.
    ///
    /// The MIME type is guessed from the name.
    pub fn from_bytes(data: impl Into<Bytes>, name: impl Into<String>) -> Self {
        let data = data.into();
        let name = name.into();
        let content_type = mime_guess::from_path(&name).first();

        let info = FileInfo {
            field_name: None,
            original_name: Some(name),
            encoding: None,
            content_type,
            declared_size: Some(data.len() as u64),
        };

        Self {
            info,
            reader: Box::new(std::io::Cursor::new(data)),
        }
    }

    /// Create from a multipart field, streaming.
    ///
    /// The field's chunks are pumped through a bounded channel so the file can
    /// be handed to a storage backend without buffering. Must be called from
    /// within a tokio runtime; the field must be processed to completion
    /// before requesting the next field from its parser.
    pub fn from_multer_field(field: multer::Field<'static>) -> Self {
        let info = FileInfo {
            field_name: field.name().map(String::from),
            original_name: field.file_name().map(String::from),
            encoding: field
                .headers()
                .get("content-transfer-encoding")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            content_type: field.content_type().cloned(),
            declared_size: None,
        };

        let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(8);
        tokio::spawn(async move {
            let mut field = field;
            loop {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(std::io::Error::other(e))).await;
                        break;
                    }
                }
            }
        });

        Self {
            info,
            reader: Box::new(StreamReader::new(ReceiverStream::new(rx))),
        }
    }

    /// Get the declared metadata.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Split into metadata and the byte source.
    pub fn into_parts(self) -> (FileInfo, FileReader) {
        (self.info, self.reader)
    }

    /// Consume and return the byte source.
    pub fn into_reader(self) -> FileReader {
        self.reader
    }
}

impl fmt::Debug for IncomingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingFile")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_extension() {
        let info = FileInfo {
            original_name: Some("archive.tar.gz".into()),
            ..Default::default()
        };
        assert_eq!(info.extension().as_deref(), Some("gz"));

        let info = FileInfo::default();
        assert_eq!(info.extension(), None);
    }

    #[tokio::test]
    async fn test_from_bytes() {
        let file = IncomingFile::from_bytes("hello", "greeting.txt");
        assert_eq!(file.info().original_name.as_deref(), Some("greeting.txt"));
        assert_eq!(file.info().declared_size, Some(5));
        assert_eq!(file.info().content_type_str().as_deref(), Some("text/plain"));

        let mut reader = file.into_reader();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }
}
