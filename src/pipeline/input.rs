//! Upload validation: decide whether a submitted file is an allowed
//! word-processor document before anything is written to storage.
//!
//! Three independent checks must agree: the file extension, the declared
//! media type, and the leading magic bytes. The first two come from the
//! untrusted client; the magic bytes catch a renamed PDF or image.

use crate::document::SourceFormat;
use crate::error::UploadRejected;
use std::path::Path;
use tracing::debug;

/// Validate an upload and return its format.
pub fn validate_upload(
    file_name: &str,
    media_type: &str,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<SourceFormat, UploadRejected> {
    let reject = |reason: String| UploadRejected {
        file_name: file_name.to_string(),
        reason,
    };

    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let by_ext = SourceFormat::from_extension(ext)
        .ok_or_else(|| reject(format!("only Word documents (.doc, .docx) are allowed, got '.{ext}'")))?;

    let by_type = SourceFormat::from_media_type(media_type)
        .ok_or_else(|| reject(format!("media type '{media_type}' is not a Word document")))?;

    if by_ext != by_type {
        return Err(reject(format!(
            "extension '.{}' does not match media type '{}'",
            ext, media_type
        )));
    }

    if bytes.is_empty() {
        return Err(reject("file is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(reject(format!(
            "file is {} bytes, limit is {} bytes",
            bytes.len(),
            max_bytes
        )));
    }

    let magic = by_ext.magic();
    if !bytes.starts_with(magic) {
        let head: Vec<u8> = bytes.iter().take(magic.len()).copied().collect();
        return Err(reject(format!(
            "content is not a .{} file (first bytes {:02X?})",
            by_ext, head
        )));
    }

    debug!("Accepted upload '{}' as {}", file_name, by_ext);
    Ok(by_ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCX_MIME: &str =
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    #[test]
    fn accepts_docx() {
        let f = validate_upload("contract.DOCX", DOCX_MIME, b"PK\x03\x04rest", 1024).unwrap();
        assert_eq!(f, SourceFormat::Docx);
    }

    #[test]
    fn accepts_doc() {
        let mut bytes = SourceFormat::Doc.magic().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        let f = validate_upload("old.doc", "application/msword", &bytes, 1024).unwrap();
        assert_eq!(f, SourceFormat::Doc);
    }

    #[test]
    fn rejects_wrong_extension() {
        let err = validate_upload("scan.pdf", DOCX_MIME, b"PK\x03\x04", 1024).unwrap_err();
        assert!(err.reason.contains(".pdf"));
    }

    #[test]
    fn rejects_wrong_media_type() {
        assert!(validate_upload("a.docx", "application/pdf", b"PK\x03\x04", 1024).is_err());
    }

    #[test]
    fn rejects_mismatched_pair() {
        let err = validate_upload("a.doc", DOCX_MIME, b"PK\x03\x04", 1024).unwrap_err();
        assert!(err.reason.contains("does not match"));
    }

    #[test]
    fn rejects_renamed_pdf() {
        let err = validate_upload("a.docx", DOCX_MIME, b"%PDF-1.7", 1024).unwrap_err();
        assert!(err.reason.contains("not a .docx"));
    }

    #[test]
    fn rejects_empty_and_oversize() {
        assert!(validate_upload("a.docx", DOCX_MIME, b"", 1024).is_err());
        let big = [b'P', b'K', 3, 4, 0, 0, 0, 0];
        assert!(validate_upload("a.docx", DOCX_MIME, &big, 4).is_err());
    }
}
