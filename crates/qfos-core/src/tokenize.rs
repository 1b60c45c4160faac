//! Deterministic URL tokenization.
//!
//! Turns a request's host, path, and query string into an ordered sequence
//! of lowercased tokens for the semantic embedder:
//!
//! - path segments split on `/`, then on `[-_.]` and camelCase transitions
//! - pure numeric runs longer than 6 digits collapse to the `<num>` sentinel
//! - the final segment's file extension is emitted separately as `ext:...`
//! - query parameter keys (values are tracking noise and are discarded)
//!   are emitted as `q:...`
//! - the host is emitted as a single `h:...` token
//!
//! [`raw_tokens`] preserves duplicates for term-frequency counting;
//! [`tokens`] deduplicates while keeping first-occurrence order.
//! Tokenization is pure: the same input always yields the same sequence.

/// Sentinel replacing numeric runs longer than this many digits.
const MAX_NUMERIC_LEN: usize = 6;

/// Sentinel token for long numeric identifiers.
pub const NUM_SENTINEL: &str = "<num>";

/// Tokenize with duplicates preserved, in emission order.
///
/// # Examples
///
/// ```
/// use qfos_core::tokenize::raw_tokens;
///
/// let tokens = raw_tokens("example.com", "/blog/home-buying-guide", None);
/// assert_eq!(tokens, vec!["h:example.com", "blog", "home", "buying", "guide"]);
///
/// let tokens = raw_tokens("example.com", "/docs/api.v2.html", Some("page=3&utm_source=x"));
/// assert_eq!(
///     tokens,
///     vec!["h:example.com", "docs", "api", "v2", "ext:html", "q:page", "q:utm_source"]
/// );
/// ```
pub fn raw_tokens(host: &str, path: &str, query_string: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();

    let host = host.trim();
    if !host.is_empty() {
        out.push(format!("h:{}", host.to_ascii_lowercase()));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.len().checked_sub(1);

    let mut extension: Option<String> = None;
    for (i, segment) in segments.iter().enumerate() {
        let mut segment = *segment;
        if Some(i) == last {
            if let Some((stem, ext)) = split_extension(segment) {
                segment = stem;
                extension = Some(ext.to_ascii_lowercase());
            }
        }
        push_segment_tokens(segment, &mut out);
    }
    if let Some(ext) = extension {
        out.push(format!("ext:{ext}"));
    }

    if let Some(query) = query_string {
        for pair in query.split('&') {
            let key = pair.split('=').next().unwrap_or("");
            if !key.is_empty() {
                out.push(format!("q:{}", key.to_ascii_lowercase()));
            }
        }
    }

    out
}

/// Tokenize with duplicates removed, keeping first-occurrence order.
pub fn tokens(host: &str, path: &str, query_string: Option<&str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw_tokens(host, path, query_string)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Split a path segment on `[-_.]` and camelCase transitions, lowercase,
/// and apply the numeric sentinel.
fn push_segment_tokens(segment: &str, out: &mut Vec<String>) {
    for part in segment.split(['-', '_', '.']) {
        if part.is_empty() {
            continue;
        }
        for word in split_camel(part) {
            if word.is_empty() {
                continue;
            }
            if word.len() > MAX_NUMERIC_LEN && word.bytes().all(|b| b.is_ascii_digit()) {
                out.push(NUM_SENTINEL.to_string());
            } else {
                out.push(word.to_ascii_lowercase());
            }
        }
    }
}

/// Split on lowercase-to-uppercase transitions: `camelCase` -> `camel`, `Case`.
fn split_camel(s: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (i, c) in s.char_indices() {
        if prev_lower && c.is_ascii_uppercase() {
            words.push(&s[start..i]);
            start = i;
        }
        prev_lower = c.is_ascii_lowercase();
    }
    words.push(&s[start..]);
    words
}

/// Detect a trailing file extension on the final path segment.
///
/// The suffix after the last `.` counts as an extension when it is 2-5
/// ASCII letters (`html`, `json`; `v2` is not, digits disqualify).
fn split_extension(segment: &str) -> Option<(&str, &str)> {
    let dot = segment.rfind('.')?;
    let (stem, ext) = (&segment[..dot], &segment[dot + 1..]);
    let valid = (2..=5).contains(&ext.len()) && ext.bytes().all(|b| b.is_ascii_alphabetic());
    if valid && !stem.is_empty() {
        Some((stem, ext))
    } else {
        None
    }
}
