//! Route anonymization
//!
//! Paths are reduced to a bounded, PII-free shape before they reach any
//! aggregate or payload. Each segment is percent-decoded and classified:
//!
//! | Segment                                   | Becomes            |
//! |-------------------------------------------|--------------------|
//! | all digits                                | `:int`             |
//! | 12+ hex digits (dashes allowed), 1+ digit | `:hash`            |
//! | 24+ token chars including a digit         | first 16 chars     |
//! | anything else                             | first 48 chars     |
//!
//! At most five segments are kept.

use url::Url;

/// Maximum number of path segments kept
pub const MAX_ROUTE_SEGMENTS: usize = 5;

/// Placeholder for numeric identifiers
pub const INT_TOKEN: &str = ":int";

/// Placeholder for hash-like identifiers
pub const HASH_TOKEN: &str = ":hash";

const MAX_SEGMENT_CHARS: usize = 48;
const OPAQUE_KEEP_CHARS: usize = 16;
const OPAQUE_MIN_CHARS: usize = 24;
const HASH_MIN_HEX_DIGITS: usize = 12;

/// Anonymize a URL path
pub fn anonymize_route(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .take(MAX_ROUTE_SEGMENTS)
        .map(classify_segment)
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Anonymized route of an absolute URL
pub fn route_for_url(url: &Url) -> String {
    anonymize_route(url.path())
}

/// Anonymized route of a navigation entry name.
///
/// Absolute names are parsed directly, relative ones resolved against
/// `base`. A bare path is accepted without a base.
pub fn route_for_name(name: &str, base: Option<&Url>) -> Option<String> {
    if let Ok(url) = Url::parse(name) {
        return match url.scheme() {
            "http" | "https" => Some(route_for_url(&url)),
            _ => None,
        };
    }

    if let Some(base) = base {
        return base.join(name).ok().map(|url| route_for_url(&url));
    }

    name.starts_with('/').then(|| anonymize_route(name))
}

/// Whether `route` has the shape [`anonymize_route`] produces
pub fn is_anonymized_route(route: &str) -> bool {
    if route == "/" {
        return true;
    }

    let Some(rest) = route.strip_prefix('/') else {
        return false;
    };

    let segments: Vec<&str> = rest.split('/').collect();
    segments.len() <= MAX_ROUTE_SEGMENTS
        && segments.iter().all(|s| {
            !s.is_empty() && s.chars().count() <= MAX_SEGMENT_CHARS && !is_numeric(s)
        })
}

fn classify_segment(raw: &str) -> String {
    let decoded = match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    };
    let decoded = decoded.replace('/', "_");

    if is_numeric(&decoded) {
        return INT_TOKEN.to_string();
    }
    if is_hash_like(&decoded) {
        return HASH_TOKEN.to_string();
    }

    let limit = if is_opaque(&decoded) {
        OPAQUE_KEEP_CHARS
    } else {
        MAX_SEGMENT_CHARS
    };
    let truncated: String = decoded.chars().take(limit).collect();

    // A long mixed token can truncate down to digits only.
    if is_numeric(&truncated) {
        INT_TOKEN.to_string()
    } else {
        truncated
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

fn is_hash_like(segment: &str) -> bool {
    let hex_digits = segment.chars().filter(|c| c.is_ascii_hexdigit()).count();

    hex_digits >= HASH_MIN_HEX_DIGITS
        && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
        && segment.chars().any(|c| c.is_ascii_digit())
}

fn is_opaque(segment: &str) -> bool {
    segment.chars().count() >= OPAQUE_MIN_CHARS
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && segment.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ids_and_hashes_collapse() {
        assert_eq!(
            anonymize_route("/customers/9876543210/orders/abcdef0123456789"),
            "/customers/:int/orders/:hash"
        );
    }

    #[test]
    fn test_root_and_trailing_slash() {
        assert_eq!(anonymize_route(""), "/");
        assert_eq!(anonymize_route("/"), "/");
        assert_eq!(anonymize_route("/docs/intro/"), "/docs/intro");
        assert_eq!(anonymize_route("//docs//intro"), "/docs/intro");
    }

    #[test]
    fn test_segment_cap() {
        assert_eq!(anonymize_route("/a/b/c/d/e/f/g"), "/a/b/c/d/e");
    }

    #[test]
    fn test_uuid_is_hash() {
        assert_eq!(
            anonymize_route("/u/550e8400-e29b-41d4-a716-446655440000"),
            "/u/:hash"
        );
    }

    #[test]
    fn test_short_hex_word_survives() {
        assert_eq!(anonymize_route("/cafe/feed"), "/cafe/feed");
    }

    #[test]
    fn test_opaque_token_truncated() {
        let token = "Zk9xQ2mP7rT4vW8yB1nC5dE6";
        assert_eq!(
            anonymize_route(&format!("/invite/{}", token)),
            "/invite/Zk9xQ2mP7rT4vW8y"
        );
    }

    #[test]
    fn test_long_slug_truncated_to_48() {
        let slug = "a-very-long-article-slug-that-keeps-going-well-beyond-the-limit";
        let route = anonymize_route(&format!("/blog/{}", slug));
        assert_eq!(route, format!("/blog/{}", &slug[..48]));
    }

    #[test]
    fn test_percent_decoding() {
        assert_eq!(anonymize_route("/search/caf%C3%A9"), "/search/café");
        assert_eq!(anonymize_route("/files/12%33"), "/files/:int");
        assert_eq!(anonymize_route("/a%2Fb"), "/a_b");
    }

    #[test]
    fn test_query_and_fragment_ignored() {
        assert_eq!(anonymize_route("/docs?id=42#top"), "/docs");
    }

    #[test]
    fn test_route_for_name() {
        let base = Url::parse("https://example.com/").unwrap();

        assert_eq!(
            route_for_name("https://example.com/orders/42", None).as_deref(),
            Some("/orders/:int")
        );
        assert_eq!(
            route_for_name("/docs/intro", Some(&base)).as_deref(),
            Some("/docs/intro")
        );
        assert_eq!(route_for_name("/docs", None).as_deref(), Some("/docs"));
        assert_eq!(route_for_name("mailto:a@example.com", None), None);
        assert_eq!(route_for_name("docs", None), None);
    }

    #[test]
    fn test_is_anonymized_route() {
        assert!(is_anonymized_route("/"));
        assert!(is_anonymized_route("/customers/:int"));
        assert!(!is_anonymized_route("customers"));
        assert!(!is_anonymized_route("/customers/42"));
        assert!(!is_anonymized_route("/a/b/c/d/e/f"));
        assert!(!is_anonymized_route("/a//b"));
    }

    proptest! {
        #[test]
        fn prop_output_is_anonymized(path in "(/[a-zA-Z0-9%_.~-]{0,64}){0,9}") {
            let route = anonymize_route(&path);
            prop_assert!(is_anonymized_route(&route), "{} -> {}", path, route);
        }

        #[test]
        fn prop_numeric_segments_never_survive(id in "[0-9]{1,40}", prefix in "[a-z]{1,10}") {
            let route = anonymize_route(&format!("/{}/{}", prefix, id));
            prop_assert_eq!(route, format!("/{}/:int", prefix));
        }

        #[test]
        fn prop_hex_ids_collapse(hash in "[0-9a-f]{12,64}") {
            prop_assume!(hash.chars().any(|c| c.is_ascii_digit()));
            prop_assume!(!hash.chars().all(|c| c.is_ascii_digit()));
            let route = anonymize_route(&format!("/objects/{}", hash));
            prop_assert_eq!(route, "/objects/:hash");
        }
    }
}
