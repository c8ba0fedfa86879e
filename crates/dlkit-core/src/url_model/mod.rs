//! Filename derivation for a task's output path (part of C1 FileAccessor
//! setup: a task needs a name before it can open its `.part` file).
//!
//! Prefers the name from a Content-Disposition header, falls back to the
//! URL's last path segment, and sanitizes whichever wins for safe use on a
//! Linux filesystem.

mod content_disposition;

pub use content_disposition::parse_content_disposition_filename;

const DEFAULT_FILENAME: &str = "download.bin";
const NAME_MAX: usize = 255;

/// Extracts the last non-empty path segment from a URL as a filename hint.
/// `None` if the URL doesn't parse or its path is empty/root.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment.is_empty() || segment == "." || segment == ".." {
        None
    } else {
        Some(segment.to_string())
    }
}

/// Sanitizes a candidate filename for safe use on Linux: replaces NUL, `/`,
/// `\`, control characters, and whitespace with `_` (collapsing runs of
/// them), trims leading/trailing dots and underscores, and caps length to
/// `NAME_MAX` (Linux's 255-byte `NAME_MAX`) on a UTF-8 boundary.
pub fn sanitize_filename_for_linux(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '\0' || c == '/' || c == '\\' || c.is_control() || c == ' ' || c == '\t' {
            '_'
        } else {
            c
        };
        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '\t' || c == '.' || c == '_');
    if trimmed.len() <= NAME_MAX {
        return trimmed.to_string();
    }
    let mut take = NAME_MAX;
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

/// Derives a safe filename for a task's output.
///
/// Tries `content_disposition` first (if present and parseable), then the
/// last path segment of `url`, then falls back to a generic default if
/// neither yields anything usable after sanitization.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url));

    let Some(raw) = candidate else { return DEFAULT_FILENAME.to_string() };

    let sanitized = sanitize_filename_for_linux(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_from_url_path_normal() {
        assert_eq!(filename_from_url_path("https://example.com/a/b/file.deb").as_deref(), Some("file.deb"));
        assert_eq!(filename_from_url_path("https://example.com/single").as_deref(), Some("single"));
    }

    #[test]
    fn filename_from_url_path_root_or_empty() {
        assert_eq!(filename_from_url_path("https://example.com/"), None);
        assert_eq!(filename_from_url_path("https://example.com"), None);
    }

    #[test]
    fn filename_from_url_path_strips_query() {
        assert_eq!(filename_from_url_path("https://example.com/file.zip?token=abc").as_deref(), Some("file.zip"));
    }

    #[test]
    fn sanitize_removes_slash_and_backslash() {
        assert_eq!(sanitize_filename_for_linux("a/b\\c.txt"), "a_b_c.txt");
    }

    #[test]
    fn sanitize_trims_dots_and_spaces() {
        assert_eq!(sanitize_filename_for_linux("  ..  file.txt  ..  "), "file.txt");
    }

    #[test]
    fn sanitize_collapses_underscores() {
        assert_eq!(sanitize_filename_for_linux("file___name.txt"), "file_name.txt");
    }

    #[test]
    fn sanitize_control_chars() {
        assert_eq!(sanitize_filename_for_linux("file\x00name.txt"), "file_name.txt");
    }

    #[test]
    fn derive_filename_from_url_path() {
        assert_eq!(derive_filename("https://example.com/archive.zip", None), "archive.zip");
        assert_eq!(derive_filename("https://cdn.example.com/path/to/debian-12.iso", None), "debian-12.iso");
    }

    #[test]
    fn derive_filename_from_content_disposition() {
        assert_eq!(
            derive_filename("https://example.com/", Some("attachment; filename=\"report.pdf\"")),
            "report.pdf"
        );
        assert_eq!(derive_filename("https://example.com/x", Some("attachment; filename=simple.bin")), "simple.bin");
    }

    #[test]
    fn derive_filename_content_disposition_overrides_url() {
        assert_eq!(
            derive_filename("https://example.com/archive.zip", Some("attachment; filename=\"real-name.tar.gz\"")),
            "real-name.tar.gz"
        );
    }

    #[test]
    fn derive_filename_empty_url_path_fallback() {
        assert_eq!(derive_filename("https://example.com/", None), "download.bin");
        assert_eq!(derive_filename("https://example.com", None), "download.bin");
    }

    #[test]
    fn derive_filename_reserved_names_fallback() {
        assert_eq!(derive_filename("https://example.com/.", None), "download.bin");
        assert_eq!(derive_filename("https://example.com/..", None), "download.bin");
    }
}
