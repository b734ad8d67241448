//! Upload boundary checks: extension allow/deny lists, size cap and a
//! magic-byte sniff of the content against the claimed type.

use crate::shared::error::ApiError;

pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "rtf"];

pub const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "vbs", "js", "jar", "dll", "msi", "ps1", "sh",
];

pub fn file_extension(file_name: &str) -> Option<String> {
    let lower = file_name.to_lowercase();
    lower.rsplit_once('.').map(|(_, ext)| ext.to_string())
}

pub fn validate_upload(file_name: &str, content: &[u8], max_size: u64) -> Result<(), ApiError> {
    let Some(extension) = file_extension(file_name) else {
        return Err(ApiError::Validation(format!(
            "File '{file_name}' has no extension"
        )));
    };

    if DANGEROUS_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::Validation(format!(
            "File type '.{extension}' is not allowed"
        )));
    }
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::Validation(format!(
            "File type '.{extension}' is not allowed, accepted types: pdf, doc, docx, txt, rtf"
        )));
    }

    if content.len() as u64 > max_size {
        return Err(ApiError::Validation(format!(
            "File exceeds the maximum size of {max_size} bytes"
        )));
    }

    if !content_matches_extension(&extension, content) {
        return Err(ApiError::Validation(format!(
            "File content does not match the '.{extension}' type"
        )));
    }

    Ok(())
}

/// Lightweight equivalent of a libmagic check, covering the accepted types.
fn content_matches_extension(extension: &str, content: &[u8]) -> bool {
    match extension {
        "pdf" => content.starts_with(b"%PDF"),
        // Legacy .doc files use the OLE compound document header.
        "doc" => content.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]),
        // .docx is a zip container.
        "docx" => content.starts_with(b"PK\x03\x04"),
        "rtf" => content.starts_with(b"{\\rtf"),
        "txt" => !content.contains(&0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 10 * 1024 * 1024;

    #[test]
    fn test_accepts_valid_pdf() {
        assert!(validate_upload("contract.pdf", b"%PDF-1.7 rest", MAX).is_ok());
    }

    #[test]
    fn test_accepts_valid_text() {
        assert!(validate_upload("notes.txt", b"plain text body", MAX).is_ok());
    }

    #[test]
    fn test_rejects_dangerous_extension() {
        let err = validate_upload("payload.exe", b"MZ", MAX).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_rejects_unknown_extension() {
        assert!(validate_upload("image.png", b"\x89PNG", MAX).is_err());
    }

    #[test]
    fn test_rejects_missing_extension() {
        assert!(validate_upload("README", b"text", MAX).is_err());
    }

    #[test]
    fn test_rejects_oversized_file() {
        assert!(validate_upload("contract.pdf", b"%PDF-1.7 rest", 4).is_err());
    }

    #[test]
    fn test_rejects_mismatched_content() {
        // Claimed pdf, actually a zip.
        assert!(validate_upload("contract.pdf", b"PK\x03\x04", MAX).is_err());
        // Claimed txt, contains binary nulls.
        assert!(validate_upload("notes.txt", b"ab\x00cd", MAX).is_err());
    }

    #[test]
    fn test_docx_and_rtf_signatures() {
        assert!(validate_upload("brief.docx", b"PK\x03\x04rest", MAX).is_ok());
        assert!(validate_upload("brief.rtf", b"{\\rtf1 body}", MAX).is_ok());
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert!(validate_upload("CONTRACT.PDF", b"%PDF-1.4", MAX).is_ok());
    }
}
