//! Azure Shared Key request signing.
//!
//! Produces the `Authorization: SharedKey {account}:{signature}` header for
//! a [`RequestDescriptor`]:
//! 1. Canonicalize the `x-ms-*` headers, the resource path and the query
//! 2. Build the string-to-sign from the verb, the eleven standard headers
//!    in fixed order and the canonical blocks
//! 3. HMAC-SHA256 it with the decoded account key and base64 the digest
//!
//! ```text
//! VERB\n
//! Content-Encoding\n
//! Content-Language\n
//! Content-Length\n
//! Content-MD5\n
//! Content-Type\n
//! Date\n
//! If-Modified-Since\n
//! If-Match\n
//! If-None-Match\n
//! If-Unmodified-Since\n
//! Range\n
//! CanonicalizedHeaders        (every entry ends with \n)
//! CanonicalizedResource       (+ \nkey:value per query parameter)
//! ```

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::credentials::CredentialSet;
use crate::errors::BlobError;
use crate::request::{RequestDescriptor, EXTENSION_PREFIX};

type HmacSha256 = Hmac<Sha256>;

/// Storage service REST API version sent and signed on every request.
pub const AZURE_API_VERSION: &str = "2015-04-05";

/// Authorization scheme name.
pub const AUTH_SCHEME: &str = "SharedKey";

// ── URI splitting ───────────────────────────────────────────────────

/// Split a scheme-less URI into `(host, path, query)`.
///
/// `acct.blob.core.windows.net/media/a.jpg?comp=metadata` yields
/// `("acct.blob.core.windows.net", "/media/a.jpg", "comp=metadata")`.
fn split_uri(uri: &str) -> (&str, &str, &str) {
    let (before_query, query) = uri.split_once('?').unwrap_or((uri, ""));
    match before_query.find('/') {
        Some(i) => (&before_query[..i], &before_query[i..], query),
        None => (before_query, "", query),
    }
}

// ── Canonicalization ────────────────────────────────────────────────

/// Build the canonicalized `x-ms-*` header block.
///
/// Non-extension keys are dropped, keys are lowercased, `x-ms-version` is
/// forced to [`AZURE_API_VERSION`], entries are sorted byte-wise by key and
/// rendered as `key:value\n` with no other separator.  Input order never
/// affects the output.
pub fn canonical_headers<I, K, V>(headers: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut ms_headers: Vec<(String, String)> = headers
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.as_ref().to_string()))
        .filter(|(k, _)| k.starts_with(EXTENSION_PREFIX) && k != "x-ms-version")
        .collect();
    ms_headers.push(("x-ms-version".to_string(), AZURE_API_VERSION.to_string()));
    ms_headers.sort();
    ms_headers.dedup_by(|later, earlier| later.0 == earlier.0);

    let mut canonical = String::new();
    for (key, value) in &ms_headers {
        canonical.push_str(key);
        canonical.push(':');
        canonical.push_str(&collapse_whitespace(value));
        canonical.push('\n');
    }
    canonical
}

/// Build the canonicalized resource: `/{account}{path}` with the query removed.
///
/// The account is the first label of the host, so the value is derived from
/// the URI alone.
pub fn canonical_resource(uri: &str) -> String {
    let (host, path, _) = split_uri(uri);
    let account = host.split('.').next().unwrap_or("");
    if account.is_empty() {
        return String::new();
    }
    format!("/{account}{path}")
}

/// Build the canonicalized query: `key:value` per parameter, sorted by
/// lowercase key and joined with `\n`.  An empty query yields `""`.
pub fn canonical_query(uri: &str) -> String {
    let (_, _, query) = split_uri(uri);
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (k.to_ascii_lowercase(), percent_decode(v))
        })
        .collect();
    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the Shared Key string-to-sign for a request.
///
/// Fails when the method, canonical headers or canonical resource is empty:
/// such a descriptor was never fully populated and must not be sent.
pub fn build_string_to_sign(request: &RequestDescriptor) -> Result<String, BlobError> {
    let method = request.method().as_str();
    if method.is_empty() {
        return Err(BlobError::SigningPrecondition { missing: "method" });
    }
    let headers = canonical_headers(request.extension_headers());
    if headers.is_empty() {
        return Err(BlobError::SigningPrecondition {
            missing: "canonicalized headers",
        });
    }
    let resource = canonical_resource(request.uri());
    if resource.is_empty() {
        return Err(BlobError::SigningPrecondition {
            missing: "canonicalized resource",
        });
    }
    let query = canonical_query(request.uri());

    let mut string_to_sign = String::with_capacity(256);
    string_to_sign.push_str(method);
    string_to_sign.push('\n');
    for value in request.standard_values() {
        string_to_sign.push_str(value);
        string_to_sign.push('\n');
    }
    string_to_sign.push_str(&headers);
    string_to_sign.push_str(&resource);
    if !query.is_empty() {
        string_to_sign.push('\n');
        string_to_sign.push_str(&query);
    }
    Ok(string_to_sign)
}

// ── Signature computation ───────────────────────────────────────────

/// Compute base64(HMAC-SHA256(key, string_to_sign)).
pub fn compute_signature(key: &[u8], string_to_sign: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Sign `request` and render the `Authorization` header value.
pub fn sign(request: &RequestDescriptor, credentials: &CredentialSet) -> Result<String, BlobError> {
    let string_to_sign = build_string_to_sign(request)?;
    let signature = compute_signature(credentials.key(), &string_to_sign);
    Ok(format!("{AUTH_SCHEME} {}:{signature}", credentials.account()))
}

// ── Helper functions ────────────────────────────────────────────────

/// Collapse runs of whitespace in a header value to a single space and trim.
fn collapse_whitespace(s: &str) -> String {
    let trimmed = s.trim();
    let mut result = String::with_capacity(trimmed.len());
    let mut last_was_space = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            result.push(ch);
            last_was_space = false;
        }
    }
    result
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    const URI: &str = "testacct.blob.core.windows.net/container/blob.txt";
    const DATE: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

    fn credentials() -> CredentialSet {
        // base64("secretkey1234567890")
        CredentialSet::new("testacct", "c2VjcmV0a2V5MTIzNDU2Nzg5MA==", "container", 4096).unwrap()
    }

    // ── split_uri ───────────────────────────────────────────────────

    #[test]
    fn test_split_uri() {
        assert_eq!(
            split_uri("a.blob.core.windows.net/c/b.txt?comp=metadata"),
            ("a.blob.core.windows.net", "/c/b.txt", "comp=metadata")
        );
        assert_eq!(split_uri("a.blob.core.windows.net"), ("a.blob.core.windows.net", "", ""));
    }

    // ── canonical_headers ───────────────────────────────────────────

    #[test]
    fn test_canonical_headers_sorted_with_trailing_newline() {
        let headers = vec![
            ("x-ms-date", DATE),
            ("x-ms-client-request-id", "req-1"),
        ];
        assert_eq!(
            canonical_headers(headers),
            format!("x-ms-client-request-id:req-1\nx-ms-date:{DATE}\nx-ms-version:{AZURE_API_VERSION}\n")
        );
    }

    #[test]
    fn test_canonical_headers_order_independent() {
        let pairs = [
            ("x-ms-date", DATE),
            ("x-ms-blob-content-type", "image/jpeg"),
            ("x-ms-client-request-id", "abc"),
            ("x-ms-blob-cache-control", "max-age=60"),
        ];
        let forward = canonical_headers(pairs.iter().copied());
        let reversed = canonical_headers(pairs.iter().rev().copied());
        let rotated = canonical_headers(pairs[2..].iter().chain(pairs[..2].iter()).copied());
        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
    }

    #[test]
    fn test_canonical_headers_filters_and_overrides_version() {
        let headers = vec![
            ("Content-Type", "text/plain"),
            ("X-MS-Meta-Name", "value"),
            ("x-ms-version", "1999-01-01"),
        ];
        assert_eq!(
            canonical_headers(headers),
            format!("x-ms-meta-name:value\nx-ms-version:{AZURE_API_VERSION}\n")
        );
    }

    #[test]
    fn test_canonical_headers_collapse_whitespace() {
        let headers = vec![("x-ms-meta-a", "  hello    world ")];
        assert!(canonical_headers(headers).starts_with("x-ms-meta-a:hello world\n"));
    }

    // ── canonical_resource / canonical_query ────────────────────────

    #[test]
    fn test_canonical_resource() {
        assert_eq!(canonical_resource(URI), "/testacct/container/blob.txt");
        assert_eq!(
            canonical_resource("testacct.blob.core.windows.net/container/blob.txt?comp=block&blockid=x"),
            "/testacct/container/blob.txt"
        );
        assert_eq!(canonical_resource("testacct.blob.core.windows.net/container"), "/testacct/container");
        assert_eq!(canonical_resource(""), "");
    }

    #[test]
    fn test_canonical_query() {
        assert_eq!(canonical_query(URI), "");
        assert_eq!(
            canonical_query("a.blob.core.windows.net/c/b?comp=block&blockid=QUJD"),
            "blockid:QUJD\ncomp:block"
        );
        assert_eq!(canonical_query("a.blob.core.windows.net/c/b?comp=metadata"), "comp:metadata");
    }

    #[test]
    fn test_canonical_query_keeps_value_equals_signs() {
        assert_eq!(
            canonical_query("a.blob.core.windows.net/c/b?blockid=QUJD%3D%3D"),
            "blockid:QUJD=="
        );
    }

    // ── string to sign ──────────────────────────────────────────────

    #[test]
    fn test_string_to_sign_layout() {
        let req = RequestDescriptor::builder(Method::PUT, format!("{URI}?comp=block&blockid=QUJD"))
            .header("Content-Length", "5")
            .header("x-ms-date", DATE)
            .build();
        let sts = build_string_to_sign(&req).unwrap();
        let expected = format!(
            "PUT\n\n\n5\n\n\n\n\n\n\n\n\nx-ms-date:{DATE}\nx-ms-version:{AZURE_API_VERSION}\n/testacct/container/blob.txt\nblockid:QUJD\ncomp:block"
        );
        assert_eq!(sts, expected);
        assert!(!sts.contains("\\n"));
    }

    #[test]
    fn test_string_to_sign_requires_resource() {
        let req = RequestDescriptor::builder(Method::GET, "").build();
        let err = build_string_to_sign(&req).unwrap_err();
        assert!(matches!(
            err,
            BlobError::SigningPrecondition {
                missing: "canonicalized resource"
            }
        ));
    }

    // ── sign ────────────────────────────────────────────────────────

    #[test]
    fn test_sign_known_vector() {
        let req = RequestDescriptor::builder(Method::PUT, URI)
            .header("x-ms-date", DATE)
            .build();
        let auth = sign(&req, &credentials()).unwrap();
        assert_eq!(auth, "SharedKey testacct:OjedU7USWqKR/nbuyUfISFUObq3baYO3vQxYXvH0PDc=");
    }

    #[test]
    fn test_sign_deterministic() {
        let req = RequestDescriptor::builder(Method::GET, format!("{URI}?comp=metadata"))
            .header("x-ms-date", DATE)
            .header("x-ms-client-request-id", "fixed")
            .build();
        let creds = credentials();
        assert_eq!(sign(&req, &creds).unwrap(), sign(&req, &creds).unwrap());
    }

    #[test]
    fn test_sign_changes_with_key() {
        let req = RequestDescriptor::builder(Method::PUT, URI)
            .header("x-ms-date", DATE)
            .build();
        let other = CredentialSet::new("testacct", "b3RoZXJrZXk=", "container", 4096).unwrap();
        assert_ne!(sign(&req, &credentials()).unwrap(), sign(&req, &other).unwrap());
    }

    #[test]
    fn test_compute_signature_matches_manual_hmac() {
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"data");
        let expected = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        assert_eq!(compute_signature(b"key", "data"), expected);
    }
}
