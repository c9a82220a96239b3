use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use sha2::{Digest, Sha256};
use url::Url;

use sift_core::SiftError;

/// Query parameters dropped during canonicalization. `utm_` matches as a
/// prefix; the rest match exactly.
const TRACKING_EXACT: &[&str] = &["fbclid", "gclid", "ref", "ref_src"];

/// Bytes kept encoded inside a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

/// The canonical identity of a web resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub url: Url,
    pub canonical: String,
    pub url_hash: String,
}

pub fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_EXACT.contains(&name)
}

/// Canonicalize a URL: lowercase scheme/host (the parser also punycodes IDN
/// hosts), elide default ports, normalize path encoding, drop tracking
/// parameters, stable-sort the rest, drop the fragment, strip the trailing
/// slash except at the root. The hash of the canonical string is the
/// service-wide cache key.
pub fn normalize(raw: &str, base: Option<&Url>) -> Result<NormalizedUrl, SiftError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SiftError::InvalidUrl("empty URL".into()));
    }

    let mut url = match base {
        Some(b) => b
            .join(trimmed)
            .map_err(|e| SiftError::InvalidUrl(format!("{trimmed}: {e}")))?,
        None => Url::parse(trimmed).map_err(|e| SiftError::InvalidUrl(format!("{trimmed}: {e}")))?,
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(SiftError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(SiftError::InvalidUrl(format!("{trimmed}: missing host")));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(SiftError::InvalidUrl("userinfo not allowed".into()));
    }

    url.set_fragment(None);

    // The parser resolves dot segments; duplicate slashes and
    // over-encoded unreserved bytes are ours to fix.
    let path = normalize_path(url.path());
    url.set_path(&path);

    normalize_query(&mut url);

    // Trailing slash is insignificant except at the root.
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let canonical = url.to_string();
    let url_hash = sha256_hex(canonical.as_bytes());

    Ok(NormalizedUrl { url, canonical, url_hash })
}

/// Remove tracking parameters from an already-parsed URL in place. Used by
/// the extractor on outbound link targets.
pub fn strip_tracking_params(url: &mut Url) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(n, v)| (n.into_owned(), v.into_owned()))
        .collect();
    if retained.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &retained {
            serializer.append_pair(name, value);
        }
        let query = serializer.finish();
        url.set_query(Some(&query));
    }
}

/// Public-suffix-aware base domain, used to classify internal vs. external
/// links and to fence crawls to their seed's site.
pub fn registrable_domain(host: &str) -> Option<String> {
    psl::domain_str(host).map(|d| d.to_ascii_lowercase())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/') {
        if !out.is_empty() || path.starts_with('/') {
            // skip duplicate slashes
            if !out.ends_with('/') {
                out.push('/');
            }
        }
        if segment.is_empty() {
            continue;
        }
        let decoded = percent_decode_str(segment).decode_utf8_lossy();
        out.push_str(&utf8_percent_encode(&decoded, PATH_SEGMENT).to_string());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn normalize_query(url: &mut Url) {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(n, v)| (n.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    // Stable sort: parameters with the same name keep their original order.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &pairs {
        serializer.append_pair(name, value);
    }
    let query = serializer.finish();
    url.set_query(Some(&query));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        normalize(raw, None).unwrap().canonical
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "HTTP://Example.COM:80/a/../b//c/?utm_source=x&z=1&a=2#frag",
            "https://example.com/",
            "https://example.com/path/?b=2&a=1",
            "https://sub.example.co.uk/page?gclid=abc",
        ];
        for raw in inputs {
            let once = canon(raw);
            assert_eq!(canon(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn lowercases_and_strips_default_port() {
        assert_eq!(canon("HTTP://EXAMPLE.com:80/Path"), "http://example.com/Path");
        assert_eq!(canon("https://example.com:443/"), "https://example.com/");
        // Non-default port survives.
        assert_eq!(canon("http://example.com:8080/"), "http://example.com:8080/");
    }

    #[test]
    fn drops_tracking_params_and_sorts_the_rest() {
        assert_eq!(
            canon("https://example.com/p?utm_campaign=spring&z=9&utm_source=mail&a=1&fbclid=x"),
            "https://example.com/p?a=1&z=9"
        );
        assert_eq!(canon("https://example.com/p?gclid=1&ref=tw&ref_src=x"), "https://example.com/p");
    }

    #[test]
    fn strips_fragment_and_trailing_slash() {
        assert_eq!(canon("https://example.com/docs/#intro"), "https://example.com/docs");
        // Root keeps its slash.
        assert_eq!(canon("https://example.com/#top"), "https://example.com/");
    }

    #[test]
    fn collapses_duplicate_slashes_and_dot_segments() {
        assert_eq!(canon("https://example.com/a//b///c"), "https://example.com/a/b/c");
        assert_eq!(canon("https://example.com/a/./b/../c"), "https://example.com/a/c");
    }

    #[test]
    fn re_encodes_unreserved_bytes() {
        assert_eq!(canon("https://example.com/%41%42%43"), "https://example.com/ABC");
        // Reserved bytes stay encoded.
        assert_eq!(canon("https://example.com/a%2Fb"), "https://example.com/a%2Fb");
    }

    #[test]
    fn resolves_relative_against_base() {
        let base = Url::parse("https://example.com/dir/page.html").unwrap();
        let n = normalize("../other?x=1", Some(&base)).unwrap();
        assert_eq!(n.canonical, "https://example.com/other?x=1");
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(normalize("ftp://example.com/", None), Err(SiftError::UnsupportedScheme(_))));
        assert!(matches!(normalize("not a url", None), Err(SiftError::InvalidUrl(_))));
        assert!(matches!(normalize("https://user:pw@example.com/", None), Err(SiftError::InvalidUrl(_))));
        assert!(matches!(normalize("", None), Err(SiftError::InvalidUrl(_))));
    }

    #[test]
    fn same_canonical_means_same_hash() {
        let a = normalize("https://example.com/p?b=2&a=1&utm_source=x", None).unwrap();
        let b = normalize("https://EXAMPLE.com/p/?a=1&b=2", None).unwrap();
        assert_eq!(a.url_hash, b.url_hash);
        assert_eq!(a.url_hash.len(), 64);
    }

    #[test]
    fn registrable_domain_groups_subdomains() {
        assert_eq!(registrable_domain("docs.example.com").as_deref(), Some("example.com"));
        assert_eq!(registrable_domain("a.b.example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(registrable_domain("example.com").as_deref(), Some("example.com"));
    }

    #[test]
    fn strip_tracking_preserves_other_params() {
        let mut url = Url::parse("https://example.com/x?utm_medium=email&keep=1").unwrap();
        strip_tracking_params(&mut url);
        assert_eq!(url.as_str(), "https://example.com/x?keep=1");

        let mut url = Url::parse("https://example.com/x?utm_medium=email").unwrap();
        strip_tracking_params(&mut url);
        assert_eq!(url.as_str(), "https://example.com/x");
    }
}
