//! Content-Disposition header parsing (`filename` and `filename*`).

use percent_encoding::percent_decode_str;

/// Extracts the filename from a raw Content-Disposition header value.
///
/// Supports `filename="value"` (quoted, backslash-unescaped), `filename=value`
/// (bare token), and `filename*=UTF-8''<percent-encoded>` (RFC 5987). When
/// both forms are present, `filename*` wins.
pub fn parse_content_disposition_filename(header_value: &str) -> Option<String> {
    let mut filename_from_token: Option<String> = None;

    for param in header_value.trim().split(';') {
        let Some((name, value)) = param.trim().split_once('=') else { continue };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("filename*") {
            if let Some(rest) = value.strip_prefix("utf-8''").or_else(|| value.strip_prefix("UTF-8''")) {
                let decoded = percent_decode_str(rest).decode_utf8_lossy();
                let decoded = decode_quoted_filename(&decoded);
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        } else if name.eq_ignore_ascii_case("filename") {
            let unquoted = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                Some(inner) => decode_quoted_filename(inner),
                None => value.to_string(),
            };
            if !unquoted.is_empty() {
                filename_from_token = Some(unquoted);
            }
        }
    }

    filename_from_token
}

/// Un-escapes backslash-quoted `"` and `\` inside a quoted-string value.
fn decode_quoted_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('"') | Some('\\') => out.push(chars.next().unwrap()),
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quoted() {
        let r = parse_content_disposition_filename("attachment; filename=\"report.pdf\"");
        assert_eq!(r.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn parse_token() {
        let r = parse_content_disposition_filename("attachment; filename=report.pdf");
        assert_eq!(r.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn parse_filename_star_utf8() {
        let r = parse_content_disposition_filename("attachment; filename*=UTF-8''caf%C3%A9.txt");
        assert_eq!(r.as_deref(), Some("café.txt"));
    }

    #[test]
    fn parse_filename_star_precedence() {
        let r = parse_content_disposition_filename(
            "attachment; filename=\"fallback.bin\"; filename*=UTF-8''real%20name.dat",
        );
        assert_eq!(r.as_deref(), Some("real name.dat"));
    }

    #[test]
    fn parse_escaped_quotes_in_quoted_filename() {
        let r = parse_content_disposition_filename("attachment; filename=\"weird\\\"name.bin\"");
        assert_eq!(r.as_deref(), Some("weird\"name.bin"));
    }
}
