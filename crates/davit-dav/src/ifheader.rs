//! WebDAV conditional header parsing
//!
//! Only the parts the lock layer needs: lock tokens are extracted from
//! `If` headers in both the no-tag and tagged-list forms; etag
//! conditions and `Not` are not evaluated.

/// Lock tokens submitted in an `If` header.
///
/// `If: (<opaquelocktoken:a>) (<opaquelocktoken:b>)` yields both tokens.
#[must_use]
pub fn parse_if_tokens(header: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = header;
    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start + 1..].find('>') else {
            break;
        };
        let candidate = &rest[start + 1..start + 1 + end];
        if candidate.starts_with("opaquelocktoken:") {
            tokens.push(candidate.to_string());
        }
        rest = &rest[start + 1 + end + 1..];
    }
    tokens
}

/// The token in a `Lock-Token` header (`<opaquelocktoken:...>`)
#[must_use]
pub fn parse_lock_token(header: &str) -> Option<String> {
    let trimmed = header.trim();
    let inner = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);
    if inner.starts_with("opaquelocktoken:") {
        Some(inner.to_string())
    } else {
        None
    }
}

/// A `Timeout` header: `Second-600` or `Infinite` (capped upstream).
#[must_use]
pub fn parse_timeout(header: &str) -> Option<u64> {
    for part in header.split(',') {
        let part = part.trim();
        if let Some(secs) = part.strip_prefix("Second-") {
            if let Ok(secs) = secs.parse() {
                return Some(secs);
            }
        }
        if part.eq_ignore_ascii_case("Infinite") {
            return Some(u64::MAX);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tag_list() {
        let tokens = parse_if_tokens("(<opaquelocktoken:abc-123>)");
        assert_eq!(tokens, vec!["opaquelocktoken:abc-123"]);
    }

    #[test]
    fn test_tagged_list_with_etag() {
        let header = "</dav/x.txt> (<opaquelocktoken:t1> [\"etag\"]) (<opaquelocktoken:t2>)";
        let tokens = parse_if_tokens(header);
        assert_eq!(tokens, vec!["opaquelocktoken:t1", "opaquelocktoken:t2"]);
    }

    #[test]
    fn test_no_tokens() {
        assert!(parse_if_tokens("([\"etag-only\"])").is_empty());
        assert!(parse_if_tokens("").is_empty());
    }

    #[test]
    fn test_lock_token_header() {
        assert_eq!(
            parse_lock_token("<opaquelocktoken:abc>").as_deref(),
            Some("opaquelocktoken:abc")
        );
        assert_eq!(
            parse_lock_token("opaquelocktoken:abc").as_deref(),
            Some("opaquelocktoken:abc")
        );
        assert!(parse_lock_token("<urn:uuid:other>").is_none());
    }

    #[test]
    fn test_timeout_header() {
        assert_eq!(parse_timeout("Second-600"), Some(600));
        assert_eq!(parse_timeout("Infinite, Second-4100000000"), Some(u64::MAX));
        assert_eq!(parse_timeout("nonsense"), None);
    }
}
