//! Content-type resolution from file names.

use mime::Mime;

/// Resolve a MIME type from a file name's extension.
///
/// Unknown or missing extensions resolve to `application/octet-stream`.
pub fn resolve(filename: &str) -> Mime {
    mime_guess::from_path(filename).first_or_octet_stream()
}

/// Resolve a MIME type as a string, without parameters.
pub fn resolve_str(filename: &str) -> String {
    resolve(filename).essence_str().to_string()
}
