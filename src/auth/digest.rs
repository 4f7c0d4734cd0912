//! Digest authentication.
//!
use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use super::nonce::{NonceProvider, NonceValidity};
use super::{AuthScheme, AuthTag, AuthenticationHandler};
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::resource::DavResource;
use crate::DavResult;

lazy_static! {
    static ref PARAM: Regex = Regex::new(r#"([A-Za-z0-9_-]+)\s*=\s*(?:"([^"]*)"|([^,\s]*))"#)
        .expect("digest parameter regex");
}

/// The parameters of a `Digest` Authorization: header, plus the request
/// method they were sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub method: String,
    pub user: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub qop: Option<String>,
    pub nc: Option<String>,
    pub cnonce: Option<String>,
    pub algorithm: Option<String>,
    pub opaque: Option<String>,
}

impl DigestResponse {
    /// Parse the part after `Digest `. Missing mandatory fields make it
    /// unparseable.
    pub fn parse(params: &str, method: &str) -> Option<DigestResponse> {
        let mut map: HashMap<String, String> = HashMap::new();
        for cap in PARAM.captures_iter(params) {
            let key = cap[1].to_ascii_lowercase();
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            map.insert(key, value);
        }
        Some(DigestResponse {
            method: method.to_string(),
            user: map.remove("username")?,
            realm: map.remove("realm")?,
            nonce: map.remove("nonce")?,
            uri: map.remove("uri")?,
            response: map.remove("response")?,
            qop: map.remove("qop"),
            nc: map.remove("nc"),
            cnonce: map.remove("cnonce"),
            algorithm: map.remove("algorithm"),
            opaque: map.remove("opaque"),
        })
    }

    /// The nonce count as a number.
    pub fn nonce_count(&self) -> Option<u64> {
        self.nc
            .as_deref()
            .and_then(|nc| u64::from_str_radix(nc, 16).ok())
    }
}

pub(crate) fn md5_hex(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

/// RFC2617 request-digest for `dr` given the user's password.
///
/// Only `qop` absent and `qop=auth` are supported; anything else is an
/// error, not a failed login.
pub fn generate_digest(dr: &DigestResponse, password: &str) -> DavResult<String> {
    let a1 = md5_hex(&format!("{}:{}:{}", dr.user, dr.realm, password));
    let a2 = md5_hex(&format!("{}:{}", dr.method, dr.uri));
    match dr.qop.as_deref() {
        None => Ok(md5_hex(&format!("{}:{}:{}", a1, dr.nonce, a2))),
        Some("auth") => Ok(md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            a1,
            dr.nonce,
            dr.nc.as_deref().unwrap_or_default(),
            dr.cnonce.as_deref().unwrap_or_default(),
            "auth",
            a2
        ))),
        Some(other) => Err(DavError::Internal(format!("unsupported qop {other}"))),
    }
}

/// Digest authentication backed by a nonce provider. The resource checks
/// the response.
#[derive(Clone)]
pub struct DigestAuthHandler {
    nonces: Arc<dyn NonceProvider>,
}

impl DigestAuthHandler {
    pub fn new(nonces: Arc<dyn NonceProvider>) -> DigestAuthHandler {
        DigestAuthHandler { nonces }
    }

    fn digest<'a>(&self, req: &'a DavRequest) -> Option<&'a DigestResponse> {
        req.auth()
            .filter(|a| a.scheme == AuthScheme::Digest)
            .and_then(|a| a.digest.as_ref())
    }
}

impl AuthenticationHandler for DigestAuthHandler {
    fn supports(&self, _res: &dyn DavResource, req: &DavRequest) -> bool {
        self.digest(req).is_some()
    }

    fn authenticate(&self, res: &dyn DavResource, req: &DavRequest) -> DavResult<Option<AuthTag>> {
        let dr = match self.digest(req) {
            Some(dr) => dr,
            None => return Ok(None),
        };
        match self.nonces.nonce_validity(&dr.nonce, dr.nonce_count()) {
            NonceValidity::Ok => {}
            NonceValidity::Expired => {
                debug!("digest: stale nonce from {}", dr.user);
                return Ok(None);
            }
            NonceValidity::Invalid => {
                debug!("digest: invalid nonce from {}", dr.user);
                return Ok(None);
            }
        }
        res.authenticate_digest(dr)
    }

    fn challenge(&self, res: &dyn DavResource, req: &DavRequest) -> Option<String> {
        let nonce = self.nonces.create_nonce(req);
        // an expired nonce gets a fresh one with stale=true, so the client
        // retries without asking the user again.
        let stale = self
            .digest(req)
            .map(|dr| self.nonces.nonce_validity(&dr.nonce, None) == NonceValidity::Expired)
            .unwrap_or(false);
        let mut ch = format!(
            "Digest realm=\"{}\", nonce=\"{}\", algorithm=\"MD5\", qop=\"auth\"",
            res.realm(),
            nonce
        );
        if stale {
            ch.push_str(", stale=\"true\"");
        }
        Some(ch)
    }

    fn is_compatible(&self, res: &dyn DavResource) -> bool {
        res.is_digest_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_EXAMPLE: &str = r#"username="Mufasa",
        realm="testrealm@host.com",
        nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093",
        uri="/dir/index.html",
        qop=auth,
        nc=00000001,
        cnonce="0a4f113b",
        response="6629fae49393a05397450978507c4ef1",
        opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn parse_rfc_example() {
        let dr = DigestResponse::parse(RFC_EXAMPLE, "GET").unwrap();
        assert_eq!(dr.user, "Mufasa");
        assert_eq!(dr.realm, "testrealm@host.com");
        assert_eq!(dr.qop.as_deref(), Some("auth"));
        assert_eq!(dr.nonce_count(), Some(1));
        assert_eq!(dr.cnonce.as_deref(), Some("0a4f113b"));
        assert!(DigestResponse::parse("username=\"x\"", "GET").is_none());
    }

    #[test]
    fn qop_auth_matches_rfc() {
        let dr = DigestResponse::parse(RFC_EXAMPLE, "GET").unwrap();
        assert_eq!(
            generate_digest(&dr, "Circle Of Life").unwrap(),
            "6629fae49393a05397450978507c4ef1"
        );
    }

    #[test]
    fn qop_unset_matches_reference() {
        let dr = DigestResponse {
            qop: None,
            nc: None,
            cnonce: None,
            ..DigestResponse::parse(RFC_EXAMPLE, "PROPFIND").unwrap()
        };
        let ha1 = format!("{:x}", md5::compute("Mufasa:testrealm@host.com:Circle Of Life"));
        let ha2 = format!("{:x}", md5::compute("PROPFIND:/dir/index.html"));
        let expected = format!(
            "{:x}",
            md5::compute(format!("{ha1}:dcd98b7102dd2f0e8b11d0f600bfb0c093:{ha2}"))
        );
        assert_eq!(generate_digest(&dr, "Circle Of Life").unwrap(), expected);
    }

    #[test]
    fn unsupported_qop_is_an_error() {
        let dr = DigestResponse {
            qop: Some("auth-int".to_string()),
            ..DigestResponse::parse(RFC_EXAMPLE, "GET").unwrap()
        };
        assert!(matches!(
            generate_digest(&dr, "Circle Of Life"),
            Err(DavError::Internal(_))
        ));
    }
}
