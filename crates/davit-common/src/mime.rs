//! MIME inference and the preview content-type rules
//!
//! Content types are always inferred server-side from the file name, never
//! trusted from the client. For inline previews, text-family files (source
//! code, configuration, logs, structured text) are forced to
//! `text/plain; charset=UTF-8` so browsers render rather than interpret
//! them; HTML keeps its own type only when downloaded.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Content type used for explicit directory marker objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

/// Fallback when nothing better can be inferred.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// How the file will be presented to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Render in the browser (`Content-Disposition: inline`).
    Preview,
    /// Save to disk (`Content-Disposition: attachment`).
    Download,
}

/// RFC 3986 unreserved characters stay literal; everything else is
/// percent-encoded. Matches the encoding S3 expects in query values and
/// `filename*=` parameters.
const STRICT_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Extensions treated as text-family for preview purposes even when their
/// registered MIME type is not `text/*`.
const TEXT_FAMILY_EXTENSIONS: &[&str] = &[
    // structured text
    "json", "xml", "yaml", "yml", "toml", "csv", "tsv", "ini", "conf", "cfg", "env",
    // markup and docs
    "md", "markdown", "rst", "txt", "log",
    // source code
    "rs", "go", "py", "js", "ts", "jsx", "tsx", "c", "h", "cpp", "hpp", "cs", "java", "kt",
    "rb", "php", "swift", "sh", "bash", "zsh", "sql", "lua", "pl", "r", "scala", "dart",
];

/// Infer a content type from a file name.
#[must_use]
pub fn infer_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

fn extension(filename: &str) -> Option<String> {
    filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Whether the file name belongs to the text family (previewable as plain
/// text).
#[must_use]
pub fn is_text_family(filename: &str) -> bool {
    if let Some(ext) = extension(filename) {
        if TEXT_FAMILY_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }
    infer_content_type(filename).starts_with("text/")
}

/// Whether a content type is textual and should carry a charset parameter.
#[must_use]
pub fn is_textual_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or(content_type).trim();
    essence.starts_with("text/")
        || matches!(
            essence,
            "application/json" | "application/xml" | "application/x-yaml" | "application/toml"
        )
}

/// The content type to serve a file with, after applying the preview rules.
///
/// - Text-family files requested for preview are forced to
///   `text/plain; charset=UTF-8` (HTML included; user content is never
///   previewed as HTML).
/// - Textual types get `; charset=UTF-8` appended.
/// - Everything else passes through as inferred.
#[must_use]
pub fn content_type_for(filename: &str, disposition: Disposition) -> String {
    let inferred = infer_content_type(filename);
    match disposition {
        Disposition::Preview if is_text_family(filename) || inferred == "text/html" => {
            "text/plain; charset=UTF-8".to_string()
        }
        _ if is_textual_content_type(&inferred) => format!("{inferred}; charset=UTF-8"),
        _ => inferred,
    }
}

/// Build the `Content-Disposition` header value for a response or a
/// presigned URL override. Attachment file names use the RFC 5987
/// `filename*=UTF-8''` form so non-ASCII names survive.
#[must_use]
pub fn content_disposition(filename: &str, disposition: Disposition) -> String {
    match disposition {
        Disposition::Preview => "inline".to_string(),
        Disposition::Download => format!(
            "attachment; filename*=UTF-8''{}",
            utf8_percent_encode(filename, STRICT_ENCODE)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_content_type() {
        assert_eq!(infer_content_type("a.txt"), "text/plain");
        assert_eq!(infer_content_type("a.json"), "application/json");
        assert_eq!(infer_content_type("a.bin"), "application/octet-stream");
        assert_eq!(infer_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn test_text_family() {
        assert!(is_text_family("main.rs"));
        assert!(is_text_family("notes.md"));
        assert!(is_text_family("config.toml"));
        assert!(is_text_family("server.log"));
        assert!(!is_text_family("photo.jpg"));
        assert!(!is_text_family("archive.tar.gz"));
    }

    #[test]
    fn test_preview_forces_text_plain() {
        assert_eq!(
            content_type_for("script.py", Disposition::Preview),
            "text/plain; charset=UTF-8"
        );
        assert_eq!(
            content_type_for("data.json", Disposition::Preview),
            "text/plain; charset=UTF-8"
        );
        // HTML is never previewed as HTML
        assert_eq!(
            content_type_for("page.html", Disposition::Preview),
            "text/plain; charset=UTF-8"
        );
    }

    #[test]
    fn test_download_keeps_type() {
        assert_eq!(
            content_type_for("page.html", Disposition::Download),
            "text/html; charset=UTF-8"
        );
        assert_eq!(
            content_type_for("photo.jpg", Disposition::Download),
            "image/jpeg"
        );
        assert_eq!(
            content_type_for("data.json", Disposition::Download),
            "application/json; charset=UTF-8"
        );
    }

    #[test]
    fn test_content_disposition_encoding() {
        assert_eq!(content_disposition("a.txt", Disposition::Preview), "inline");
        assert_eq!(
            content_disposition("report final.pdf", Disposition::Download),
            "attachment; filename*=UTF-8''report%20final.pdf"
        );
        assert_eq!(
            content_disposition("café.txt", Disposition::Download),
            "attachment; filename*=UTF-8''caf%C3%A9.txt"
        );
    }
}
