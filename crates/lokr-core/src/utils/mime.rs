//! Declared vs. sniffed content-type validation.
//!
//! The declared type of an upload is checked against the type sniffed from
//! its magic bytes. A mismatch is reported, never corrected.

use crate::error::{LokrError, LokrResult};

/// Types that name the same format
const ALIASES: &[&[&str]] = &[
    &["image/jpeg", "image/jpg", "image/pjpeg"],
    &["audio/mpeg", "audio/mp3"],
    &["audio/wav", "audio/x-wav", "audio/wave"],
    &["audio/flac", "audio/x-flac"],
    &["application/zip", "application/x-zip-compressed"],
    &["application/gzip", "application/x-gzip"],
    &["application/vnd.rar", "application/x-rar-compressed"],
    &["image/x-icon", "image/vnd.microsoft.icon"],
    &["text/xml", "application/xml"],
];

/// Declared types accepted when the content has no recognizable signature
const TEXT_LIKE: &[&str] = &[
    "text/plain",
    "text/csv",
    "text/markdown",
    "text/html",
    "text/css",
    "text/javascript",
    "text/xml",
    "text/yaml",
    "application/javascript",
    "application/json",
    "application/xml",
    "application/yaml",
    "application/x-yaml",
    "application/x-sh",
    "image/svg+xml",
    "text/x-shellscript",
];

/// Sniffed types that are plain text underneath; `text/plain` is accepted for them
const TEXT_SIGNATURES: &[&str] = &["text/html", "text/xml", "text/x-shellscript"];

/// Lower-case a content type and drop any parameters (`; charset=...`)
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Sniff the content type from magic bytes, if recognizable
pub fn sniff_mime(content: &[u8]) -> Option<&'static str> {
    infer::get(content).map(|kind| kind.mime_type())
}

fn same_format(a: &str, b: &str) -> bool {
    a == b
        || ALIASES
            .iter()
            .any(|group| group.contains(&a) && group.contains(&b))
}

/// Whether `declared` is an acceptable type for `content`
pub fn validate_mime(content: &[u8], declared: &str) -> bool {
    let declared = normalize_mime(declared);
    match sniff_mime(content) {
        Some(detected) => {
            same_format(&declared, detected)
                || (declared == "text/plain" && TEXT_SIGNATURES.contains(&detected))
        }
        None => TEXT_LIKE.contains(&declared.as_str()),
    }
}

/// Like [`validate_mime`], surfacing a `MimeMismatch` error on failure
pub fn check_mime(content: &[u8], declared: &str) -> LokrResult<()> {
    if validate_mime(content, declared) {
        return Ok(());
    }
    Err(LokrError::MimeMismatch {
        declared: declared.to_string(),
        detected: sniff_mime(content).unwrap_or("unknown").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
    const PDF: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";

    #[test]
    fn test_sniffed_type_must_match() {
        assert!(validate_mime(PNG, "image/png"));
        assert!(!validate_mime(PNG, "image/gif"));
        assert!(validate_mime(PDF, "application/pdf"));
        assert!(!validate_mime(PDF, "text/plain"));
    }

    #[test]
    fn test_alias_table() {
        assert!(validate_mime(JPEG, "image/jpeg"));
        assert!(validate_mime(JPEG, "image/jpg"));
        assert!(validate_mime(JPEG, "IMAGE/JPG"));
    }

    #[test]
    fn test_unknown_content_only_for_text_like() {
        assert!(validate_mime(b"hello lokr", "text/plain"));
        assert!(validate_mime(b"hello lokr", "text/plain; charset=utf-8"));
        assert!(validate_mime(b"{\"a\":1}", "application/json"));
        assert!(!validate_mime(b"hello lokr", "image/png"));
        assert!(!validate_mime(b"hello lokr", "application/octet-stream"));
    }

    #[test]
    fn test_text_signatures_accept_plain_text() {
        let script = b"#!/bin/sh\necho hello\n";
        assert_eq!(sniff_mime(script), Some("text/x-shellscript"));
        assert!(validate_mime(script, "text/plain"));
        assert!(validate_mime(script, "text/x-shellscript"));
        assert!(!validate_mime(script, "image/png"));

        let page = b"<!DOCTYPE html><html><body>hi</body></html>";
        assert!(validate_mime(page, "text/html"));
        assert!(validate_mime(page, "text/plain"));
        assert!(!validate_mime(page, "application/json"));

        // Binary signatures are never plain text
        assert!(!validate_mime(PNG, "text/plain"));
    }

    #[test]
    fn test_check_mime_reports_detected_type() {
        let err = check_mime(PNG, "application/pdf").unwrap_err();
        match err {
            LokrError::MimeMismatch { declared, detected } => {
                assert_eq!(declared, "application/pdf");
                assert_eq!(detected, "image/png");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = check_mime(b"plain words", "image/png").unwrap_err();
        assert!(matches!(err, LokrError::MimeMismatch { ref detected, .. } if detected == "unknown"));
    }

    #[test]
    fn test_normalize_mime() {
        assert_eq!(normalize_mime(" Text/Plain ; charset=UTF-8"), "text/plain");
        assert_eq!(normalize_mime(""), "");
    }
}
