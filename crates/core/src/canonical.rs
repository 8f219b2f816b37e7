//! URL canonicalization: normalize scheme/host/port/path/query, strip
//! tracking parameters, and compute a stable dedup key + hash.
//!
//! Parses the URL by hand (split on `://`, then the host/path/query/
//! fragment boundaries) rather than through a general URL library, so
//! that malformed input degrades gracefully instead of producing a parse
//! error: any failure here falls back to returning the input unchanged.

use std::collections::BTreeSet;

/// The full tracking-parameter set. Membership must stay fixed across
/// versions of this crate: removing or adding an entry changes dedup
/// keys for every URL that carries that parameter.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "utm_source_platform",
    "utm_creative_format",
    "utm_marketing_tactic",
    "fbclid",
    "fb_action_ids",
    "fb_action_types",
    "fb_source",
    "fb_ref",
    "twclid",
    "s",
    "t",
    "ref_src",
    "ref_url",
    "li_fat_id",
    "li_source",
    "li_medium",
    "li_campaign",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "tag",
    "linkCode",
    "camp",
    "creative",
    "creativeASIN",
    "gclid",
    "gclsrc",
    "dclid",
    "wbraid",
    "gbraid",
    "ref",
    "referrer",
    "source",
    "campaign",
    "medium",
    "affiliate",
    "partner",
    "click_id",
    "clickid",
    "session_id",
    "sessionid",
    "sid",
    "token",
    "tracking_id",
    "trackingid",
    "tid",
    "cid",
    "email",
    "e",
    "newsletter",
    "subscriber",
    "promo",
    "promotion",
    "discount",
    "coupon",
    "variant",
    "test",
    "experiment",
    "ab_test",
    "timestamp",
    "ts",
    "time",
    "date",
    "user_id",
    "userid",
    "uid",
    "id",
    "ip",
    "ip_address",
    "ipaddr",
    "device",
    "platform",
    "os",
    "browser",
    "version",
    "v",
    "build",
    "release",
];

fn is_tracking_parameter(param: &str) -> bool {
    let lower = param.to_lowercase();
    if lower.starts_with("utm_") {
        return true;
    }
    TRACKING_PARAMS.contains(&lower.as_str())
}

struct Parts {
    scheme: String,
    host: String,
    path: String,
    query: String,
}

/// Splits a raw URL into its components by hand. Never panics; falls
/// back to treating the whole input as an opaque path on anything it
/// can't make sense of.
fn split(url: &str) -> Parts {
    let mut rest = url.trim();

    if let Some(stripped) = rest.strip_prefix('?') {
        return Parts {
            scheme: "http".to_string(),
            host: String::new(),
            path: "/".to_string(),
            query: stripped.split('#').next().unwrap_or("").to_string(),
        };
    }
    if rest.starts_with('#') {
        return Parts {
            scheme: "http".to_string(),
            host: String::new(),
            path: "/".to_string(),
            query: String::new(),
        };
    }

    let (scheme, authority_and_path) = match rest.find("://") {
        Some(idx) => (&rest[..idx], &rest[idx + 3..]),
        None => ("http", rest),
    };
    rest = authority_and_path;

    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..host_end];
    rest = &rest[host_end..];

    let (path_and_query, _fragment) = match rest.find('#') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };

    let (path, query) = match path_and_query.find('?') {
        Some(idx) => (&path_and_query[..idx], &path_and_query[idx + 1..]),
        None => (path_and_query, ""),
    };

    let path = if path.is_empty() { "/" } else { path };

    Parts {
        scheme: scheme.to_string(),
        host: host.to_string(),
        path: path.to_string(),
        query: query.to_string(),
    }
}

fn normalize_scheme(scheme: &str) -> String {
    if scheme.is_empty() {
        return "http".to_string();
    }
    scheme.to_lowercase()
}

const DEFAULT_PORTS: &[(&str, &str)] = &[
    ("http", "80"),
    ("https", "443"),
    ("ftp", "21"),
    ("ssh", "22"),
];

fn normalize_host(host: &str, scheme: &str) -> String {
    let mut host = host.to_lowercase();
    if let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }
    if let Some(colon) = host.rfind(':') {
        let (h, port) = host.split_at(colon);
        let port = &port[1..];
        let is_default = DEFAULT_PORTS
            .iter()
            .any(|(s, p)| *s == scheme && *p == port);
        if is_default || port.is_empty() {
            host = h.to_string();
        }
    }
    // IDN punycode conversion is a no-op for ASCII hosts, which is all we
    // expect here; non-ASCII hosts pass through unchanged.
    host
}

/// Percent-decodes a string. Malformed escapes (truncated or
/// non-hex) are left as a literal `%` rather than treated as an error,
/// matching the original canonicalizer's never-throw contract.
fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
                let byte = u8::from_str_radix(hex, 16).unwrap();
                out.push(byte);
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.as_bytes() {
        if is_unreserved(*b) {
            out.push(*b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

fn normalize_path(path: &str) -> String {
    let decoded = percent_decode(path, false);
    let collapsed = collapse_slashes(&decoded);
    let with_leading = if collapsed.starts_with('/') {
        collapsed
    } else {
        format!("/{}", collapsed)
    };
    if with_leading.len() > 1 && with_leading.ends_with('/') {
        with_leading[..with_leading.len() - 1].to_string()
    } else {
        with_leading
    }
}

fn parse_and_sort_query(query: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if query.is_empty() {
        return pairs;
    }
    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (k, v) = match part.find('=') {
            Some(idx) => (&part[..idx], &part[idx + 1..]),
            None => (part, ""),
        };
        let key = percent_decode(k, true);
        let value = percent_decode(v, true);
        if is_tracking_parameter(&key) {
            continue;
        }
        pairs.push((key, value));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

fn normalize_query(query: &str) -> String {
    let pairs = parse_and_sort_query(query);
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", percent_encode(&k), percent_encode(&v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonicalizes a raw URL string. Never fails: on anything unparseable
/// it returns the input unchanged, the caller is expected to log a
/// warning to the log bus.
pub fn canonicalize(url: &str) -> String {
    let result = std::panic::catch_unwind(|| {
        let parts = split(url);
        let scheme = normalize_scheme(&parts.scheme);
        let host = normalize_host(&parts.host, &scheme);
        let path = normalize_path(&parts.path);
        let query = normalize_query(&parts.query);

        let mut out = format!("{}://{}{}", scheme, host, path);
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        out
    });
    result.unwrap_or_else(|_| url.to_string())
}

pub fn host(url: &str) -> String {
    let parts = split(url);
    normalize_host(&parts.host, &normalize_scheme(&parts.scheme))
}

pub fn path(url: &str) -> String {
    let parts = split(url);
    normalize_path(&parts.path)
}

pub fn query(url: &str) -> String {
    let parts = split(url);
    normalize_query(&parts.query)
}

/// Deterministic 64-bit FNV-1a hash of the canonical form, hex-encoded.
/// Stable across processes and versions (unlike `std::hash`, which is
/// randomly seeded per process and unsuitable as a persisted dedup key).
pub fn hash(url: &str) -> String {
    let canon = canonicalize(url);
    let mut h: u64 = 0xcbf29ce484222325;
    for b in canon.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", h)
}

/// Strips the `www.` prefix and lowercases, for domain-restriction
/// comparisons (§9 Open Question: exact match after `www.` strip only).
pub fn normalized_host_for_comparison(url: &str) -> String {
    host(url)
}

pub fn is_tracking_param(param: &str) -> bool {
    is_tracking_parameter(param)
}

pub fn tracking_parameters() -> BTreeSet<&'static str> {
    TRACKING_PARAMS.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_canonicalization_e2e() {
        let input = "https://WWW.Example.com:443/a//b/?utm_source=nl&b=2&a=1#frag";
        assert_eq!(canonicalize(input), "https://example.com/a/b?a=1&b=2");
    }

    #[test]
    fn stability_property() {
        let u = "https://Example.com/Foo//Bar/?z=1&utm_campaign=x&a=2";
        let once = canonicalize(u);
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn tracking_param_removal_is_noop() {
        let base = canonicalize("https://example.com/page");
        for p in ["utm_source", "fbclid", "gclid", "ref", "sid"] {
            let with_param = canonicalize(&format!("https://example.com/page?{}=x", p));
            assert_eq!(with_param, base, "param {p} should be stripped");
        }
    }

    #[test]
    fn default_scheme_and_fragment_inputs() {
        assert_eq!(canonicalize("example.com/a"), "http://example.com/a");
        assert_eq!(canonicalize("?x=1"), "http:///?x=1");
        assert_eq!(canonicalize("#top"), "http:///");
    }

    #[test]
    fn path_trailing_slash_and_collapse() {
        assert_eq!(canonicalize("http://a.com///"), "http://a.com/");
        assert_eq!(canonicalize("http://a.com/"), "http://a.com/");
        assert_eq!(canonicalize("http://a.com/x/"), "http://a.com/x");
    }

    #[test]
    fn query_sort_is_stable_by_key() {
        assert_eq!(
            canonicalize("http://a.com?z=1&a=2&m=3"),
            "http://a.com/?a=2&m=3&z=1"
        );
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let a = hash("https://example.com/a?utm_source=x");
        let b = hash("https://EXAMPLE.com/a");
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_percent_escape_is_preserved_literally() {
        assert_eq!(canonicalize("http://a.com/%zz"), "http://a.com/%zz");
    }
}
