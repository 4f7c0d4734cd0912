//! Request paths.
//!
//! A [`DavPath`] is the decoded path of a request with the handler prefix
//! stripped off. Resource resolvers see the decoded form (`as_str`), clients
//! see the percent-encoded form (`as_url_string`).
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::DavError;
use crate::DavResult;

// Everything except unreserved characters and the sub-delims that are safe
// inside a segment. A literal '&' is always encoded, some clients do not
// cope with it in hrefs.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Decoded, normalized request path.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    prefix: String,
    segments: Vec<String>,
    collection: bool,
    star: bool,
}

impl DavPath {
    /// Path from a decoded absolute path like `/a/b/`.
    pub fn new(path: &str) -> DavResult<DavPath> {
        Self::from_decoded(path, "")
    }

    /// Path from the request uri, with `prefix` stripped off.
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> DavResult<DavPath> {
        let raw = uri.path();
        if raw == "*" {
            return Ok(DavPath {
                prefix: String::new(),
                segments: Vec::new(),
                collection: false,
                star: true,
            });
        }
        Self::from_encoded(raw, prefix)
    }

    /// Path from a percent-encoded absolute path.
    pub fn from_encoded(raw: &str, prefix: &str) -> DavResult<DavPath> {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| DavError::InvalidPath)?;
        Self::from_decoded(&decoded, prefix)
    }

    fn from_decoded(path: &str, prefix: &str) -> DavResult<DavPath> {
        if !path.starts_with('/') || path.contains('\0') {
            return Err(DavError::InvalidPath);
        }
        let prefix = prefix.trim_end_matches('/');
        let rest = match path.strip_prefix(prefix) {
            Some(r) if r.is_empty() || r.starts_with('/') => r,
            _ => return Err(DavError::InvalidPath),
        };
        let mut segments: Vec<String> = Vec::new();
        for seg in rest.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(DavError::InvalidPath);
                    }
                }
                s => segments.push(s.to_string()),
            }
        }
        let collection = segments.is_empty() || rest.ends_with('/');
        Ok(DavPath {
            prefix: prefix.to_string(),
            segments,
            collection,
            star: false,
        })
    }

    /// Decoded path, without prefix and without trailing slash.
    pub fn as_str(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// Percent-encoded path without the prefix. Collections end in `/`.
    pub fn as_url_string(&self) -> String {
        let mut s = String::from("/");
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                s.push('/');
            }
            s.push_str(&encode_segment(seg));
        }
        if self.collection && !self.segments.is_empty() {
            s.push('/');
        }
        s
    }

    /// Percent-encoded path including the prefix, as sent to clients.
    pub fn as_url_string_with_prefix(&self) -> String {
        format!("{}{}", encode_prefix(&self.prefix), self.as_url_string())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Last path segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn parent(&self) -> DavPath {
        let mut segments = self.segments.clone();
        segments.pop();
        DavPath {
            prefix: self.prefix.clone(),
            segments,
            collection: true,
            star: false,
        }
    }

    /// Child path `name` below this one.
    pub fn join(&self, name: &str) -> DavPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        DavPath {
            prefix: self.prefix.clone(),
            segments,
            collection: false,
            star: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn is_star(&self) -> bool {
        self.star
    }

    pub fn add_slash(&mut self) {
        self.collection = true;
    }
}

fn encode_prefix(prefix: &str) -> String {
    prefix
        .split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_url_string_with_prefix())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefix_and_decodes() {
        let uri: http::Uri = "/dav/a%20b/c.txt".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav/").unwrap();
        assert_eq!(p.as_str(), "/a b/c.txt");
        assert_eq!(p.as_url_string(), "/a%20b/c.txt");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/a%20b/c.txt");
        assert_eq!(p.file_name(), Some("c.txt"));
        assert!(!p.is_collection());
    }

    #[test]
    fn wrong_prefix_is_invalid() {
        let uri: http::Uri = "/other/x".parse().unwrap();
        assert!(DavPath::from_uri_and_prefix(&uri, "/dav").is_err());
        let uri: http::Uri = "/davx/x".parse().unwrap();
        assert!(DavPath::from_uri_and_prefix(&uri, "/dav").is_err());
    }

    #[test]
    fn dotdot_cannot_escape_root() {
        assert!(DavPath::new("/a/../..").is_err());
        assert_eq!(DavPath::new("/a/./b/../c").unwrap().as_str(), "/a/c");
    }

    #[test]
    fn ampersand_is_escaped() {
        let p = DavPath::new("/R&D/").unwrap();
        assert_eq!(p.as_url_string(), "/R%26D/");
        assert!(p.is_collection());
    }

    #[test]
    fn parent_and_join() {
        let p = DavPath::new("/a/b.txt").unwrap();
        assert_eq!(p.parent().as_url_string(), "/a/");
        assert_eq!(p.parent().parent().as_url_string(), "/");
        assert!(p.parent().parent().is_root());
        assert_eq!(p.parent().join("c d").as_url_string(), "/a/c%20d");
    }
}
