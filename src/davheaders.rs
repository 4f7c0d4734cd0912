use std::fmt;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ls::LockTimeout;
use crate::DavResult;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
}

const TOKEN_PREFIX: &str = "opaquelocktoken:";
const NO_LOCK: &str = "(<DAV:no-lock>)";

fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    v.to_str().map_err(|_| headers::Error::invalid())
}

fn put<E: Extend<HeaderValue>>(values: &mut E, s: &str) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    /// Numeric depth for tree walks.
    pub fn levels(&self) -> usize {
        match self {
            Depth::Zero => 0,
            Depth::One => 1,
            Depth::Infinity => usize::MAX,
        }
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.trim().to_ascii_lowercase().as_str() {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// Timeout: header. Only the first usable value counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub LockTimeout);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            for word in value.split(',') {
                if let Some(t) = LockTimeout::parse(word.trim()) {
                    return Ok(Timeout(t));
                }
            }
        }
        Err(headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        put(values, &self.0.to_string());
    }
}

/// Overwrite: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.trim() {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// Destination: header, unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(Destination(one(values)?.trim().to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        put(values, &self.0);
    }
}

/// If: header.
///
/// Only two things are looked at: which lock tokens are cited, and whether
/// it is the `(<DAV:no-lock>)` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub String);

impl If {
    /// Token ids cited, the text between `opaquelocktoken:` and `>`.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut rest = self.0.as_str();
        while let Some(start) = rest.find(TOKEN_PREFIX) {
            rest = &rest[start + TOKEN_PREFIX.len()..];
            match rest.find('>') {
                Some(end) => {
                    tokens.push(rest[..end].to_string());
                    rest = &rest[end..];
                }
                None => break,
            }
        }
        tokens
    }

    pub fn cites(&self, token_id: &str) -> bool {
        self.tokens().iter().any(|t| t == token_id)
    }

    pub fn is_no_lock(&self) -> bool {
        self.0.trim() == NO_LOCK
    }
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut all = Vec::new();
        for value in values {
            all.push(value.to_str().map_err(|_| headers::Error::invalid())?);
        }
        if all.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(If(all.join(" ")))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        put(values, &self.0);
    }
}

/// Lock-Token: header, holding the bare token id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.trim();
        let s = s.strip_prefix('<').unwrap_or(s);
        let s = s.strip_suffix('>').unwrap_or(s);
        let s = s.strip_prefix(TOKEN_PREFIX).unwrap_or(s);
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(LockToken(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        put(values, &format!("<{}{}>", TOKEN_PREFIX, self.0));
    }
}

/// A parsed MOVE destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dest {
    pub host: String,
    pub path: DavPath,
}

impl Dest {
    /// Parse a Destination value. Absolute urls, bare paths and trailing
    /// slashes are all accepted. Without a host in the url the source
    /// host is used.
    pub fn parse(value: &str, source_host: &str, prefix: &str) -> DavResult<Dest> {
        let lower = value.to_ascii_lowercase();
        let (host, path) = if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = url::Url::parse(value)
                .map_err(|_| DavError::BadRequest(format!("bad destination {value}")))?;
            let host = url.host_str().unwrap_or(source_host).to_string();
            (host, url.path().to_string())
        } else {
            (source_host.to_string(), value.to_string())
        };
        let path = DavPath::from_encoded(path.trim_end_matches('/'), prefix)
            .map_err(|_| DavError::BadRequest(format!("bad destination {value}")))?;
        if path.is_root() {
            return Err(DavError::BadRequest("destination is the root".to_string()));
        }
        Ok(Dest { host, path })
    }

    /// Decoded path of the parent collection.
    pub fn parent_url(&self) -> String {
        self.path.parent().as_str()
    }

    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }
}

impl fmt::Display for Dest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn depth() {
        assert_eq!(headers("depth", "0").typed_get::<Depth>(), Some(Depth::Zero));
        assert_eq!(
            headers("depth", "Infinity").typed_get::<Depth>(),
            Some(Depth::Infinity)
        );
        assert_eq!(headers("depth", "2").typed_get::<Depth>(), None);
    }

    #[test]
    fn timeout_first_value_wins_and_caps() {
        let t = headers("timeout", "Second-99999999999, Infinite").typed_get::<Timeout>();
        assert_eq!(t, Some(Timeout(LockTimeout::Seconds(u32::MAX))));
        let t = headers("timeout", "Infinite, Second-4100000000").typed_get::<Timeout>();
        assert_eq!(t, Some(Timeout(LockTimeout::Infinite)));
        let t = headers("timeout", "bogus, Second-60").typed_get::<Timeout>();
        assert_eq!(t, Some(Timeout(LockTimeout::Seconds(60))));
    }

    #[test]
    fn if_header_tokens() {
        let h = headers(
            "if",
            "</a/b> (<opaquelocktoken:abc-1>) (<opaquelocktoken:def-2> [\"etag\"])",
        );
        let i = h.typed_get::<If>().unwrap();
        assert_eq!(i.tokens(), vec!["abc-1".to_string(), "def-2".to_string()]);
        assert!(i.cites("def-2"));
        assert!(!i.cites("abc"));
        assert!(!i.is_no_lock());
        let i = headers("if", "(<DAV:no-lock>)").typed_get::<If>().unwrap();
        assert!(i.is_no_lock());
        assert!(i.tokens().is_empty());
    }

    #[test]
    fn lock_token_header() {
        let t = headers("lock-token", "<opaquelocktoken:1234>").typed_get::<LockToken>();
        assert_eq!(t, Some(LockToken("1234".to_string())));
        let mut h = HeaderMap::new();
        h.typed_insert(LockToken("xyz".to_string()));
        assert_eq!(h.get("lock-token").unwrap(), "<opaquelocktoken:xyz>");
    }

    #[test]
    fn overwrite() {
        assert_eq!(
            headers("overwrite", "F").typed_get::<Overwrite>(),
            Some(Overwrite(false))
        );
        assert_eq!(
            headers("overwrite", "T").typed_get::<Overwrite>(),
            Some(Overwrite(true))
        );
    }

    #[test]
    fn dest_forms() {
        let d = Dest::parse("http://example.com:8080/a/new%20file.txt", "src", "").unwrap();
        assert_eq!(d.host, "example.com");
        assert_eq!(d.parent_url(), "/a");
        assert_eq!(d.name(), "new file.txt");

        let d = Dest::parse("/a/b/", "src", "").unwrap();
        assert_eq!(d.host, "src");
        assert_eq!(d.parent_url(), "/a");
        assert_eq!(d.name(), "b");

        let d = Dest::parse("/top", "src", "").unwrap();
        assert_eq!(d.parent_url(), "/");
        assert_eq!(d.name(), "top");

        let d = Dest::parse("/dav/x/y", "src", "/dav").unwrap();
        assert_eq!(d.parent_url(), "/x");

        assert!(Dest::parse("/", "src", "").is_err());
    }
}
