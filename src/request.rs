//! Immutable per-request descriptors.
//!
//! A [`RequestDescriptor`] captures everything the Shared Key signer needs:
//! the HTTP method, the scheme-less target URI, the eleven standard headers
//! that occupy fixed positions in the string-to-sign, and the `x-ms-*`
//! extension headers.  It is assembled once through [`RequestBuilder`] and
//! never mutated afterwards, so nothing leaks between requests.

use std::collections::BTreeMap;

use http::Method;

/// Standard headers in the exact order they appear in the string-to-sign.
pub const STANDARD_HEADERS: [&str; 11] = [
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-MD5",
    "Content-Type",
    "Date",
    "If-Modified-Since",
    "If-Match",
    "If-None-Match",
    "If-Unmodified-Since",
    "Range",
];

/// Prefix identifying service extension headers.
pub const EXTENSION_PREFIX: &str = "x-ms-";

/// A fully assembled request, ready to be signed and sent.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    uri: String,
    standard: [String; 11],
    extensions: BTreeMap<String, String>,
}

impl RequestDescriptor {
    /// Start building a request for `method` against the scheme-less `uri`.
    pub fn builder(method: Method, uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            uri: uri.into(),
            standard: Default::default(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URI without scheme, e.g. `acct.blob.core.windows.net/media/a.jpg?comp=metadata`.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Standard header values in string-to-sign order; unset headers are empty.
    pub fn standard_values(&self) -> impl Iterator<Item = &str> {
        self.standard.iter().map(String::as_str)
    }

    /// Value of a standard header, or the empty string when unset.
    pub fn standard_header(&self, name: &str) -> &str {
        standard_index(name)
            .map(|i| self.standard[i].as_str())
            .unwrap_or("")
    }

    /// Extension headers keyed by lowercase name.
    pub fn extension_headers(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }

    /// All non-empty headers to put on the wire, as `(name, value)` pairs.
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = STANDARD_HEADERS
            .iter()
            .zip(self.standard.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        headers.extend(
            self.extensions
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        headers
    }
}

/// Builder for [`RequestDescriptor`].
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    uri: String,
    standard: [String; 11],
    extensions: BTreeMap<String, String>,
}

impl RequestBuilder {
    /// Set a header. Standard headers land in their fixed slot (matched
    /// case-insensitively); anything else is stored as an extension header
    /// under its lowercase name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match standard_index(name) {
            Some(i) => self.standard[i] = value,
            None => {
                self.extensions.insert(name.to_ascii_lowercase(), value);
            }
        }
        self
    }

    pub fn build(self) -> RequestDescriptor {
        RequestDescriptor {
            method: self.method,
            uri: self.uri,
            standard: self.standard,
            extensions: self.extensions,
        }
    }
}

fn standard_index(name: &str) -> Option<usize> {
    STANDARD_HEADERS
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
}
