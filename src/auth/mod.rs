//! HTTP authentication (RFC2617).
//!
//! An [`AuthenticationService`] holds an ordered chain of
//! [`AuthenticationHandler`]s. The first handler that supports a request
//! decides the outcome, but every handler compatible with the resource
//! contributes a challenge to a 401 response.
//!
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http::HeaderMap;

use crate::context::DavRequest;
use crate::resource::DavResource;
use crate::util::DavMethod;
use crate::DavResult;

pub mod basic;
pub mod digest;
pub mod nonce;
pub mod security;

pub use basic::BasicAuthHandler;
pub use digest::{DigestAuthHandler, DigestResponse};
pub use nonce::{MemNonceProvider, NonceProvider, NonceReaper, NonceValidity};
pub use security::{SecurityManager, SimpleSecurityManager};

/// Whatever the security layer wants to carry around as proof of identity.
pub type AuthTag = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
    Form,
}

/// Credentials presented by a request.
///
/// `tag` is set once a handler accepted them.
#[derive(Clone)]
pub struct Auth {
    pub scheme: AuthScheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub digest: Option<DigestResponse>,
    pub tag: Option<AuthTag>,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Auth")
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .field("tagged", &self.tag.is_some())
            .finish()
    }
}

impl Auth {
    pub fn new(scheme: AuthScheme, user: Option<String>) -> Auth {
        Auth {
            scheme,
            user,
            password: None,
            digest: None,
            tag: None,
        }
    }

    /// An identity established by whoever embeds the handler.
    pub fn pre_authenticated(user: impl Into<String>) -> Auth {
        let user = user.into();
        Auth {
            tag: Some(Arc::new(user.clone())),
            ..Auth::new(AuthScheme::Form, Some(user))
        }
    }

    /// Parse the Authorization: header, if any.
    pub fn from_headers(headers: &HeaderMap, method: DavMethod) -> Option<Auth> {
        if let Some(basic) = headers.typed_get::<Authorization<Basic>>() {
            return Some(Auth {
                password: Some(basic.password().to_string()),
                ..Auth::new(AuthScheme::Basic, Some(basic.username().to_string()))
            });
        }
        let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, params) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("digest") {
            trace!("unsupported authorization scheme {}", scheme);
            return None;
        }
        let digest = DigestResponse::parse(params, method.name())?;
        Some(Auth {
            digest: Some(digest.clone()),
            ..Auth::new(AuthScheme::Digest, Some(digest.user))
        })
    }

    pub fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }
}

/// Result of running the chain.
#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub auth: Option<Auth>,
    /// Credentials were presented and rejected. Never the same as
    /// anonymous.
    pub login_failed: bool,
}

/// One link of the authentication chain.
pub trait AuthenticationHandler: Send + Sync {
    /// Does this handler understand the credentials in the request.
    fn supports(&self, res: &dyn DavResource, req: &DavRequest) -> bool;

    /// Check the credentials. `None` means they were rejected.
    fn authenticate(&self, res: &dyn DavResource, req: &DavRequest) -> DavResult<Option<AuthTag>>;

    /// WWW-Authenticate value for a 401 response.
    fn challenge(&self, res: &dyn DavResource, req: &DavRequest) -> Option<String>;

    /// Can this handler be used with this resource at all.
    fn is_compatible(&self, res: &dyn DavResource) -> bool;
}

/// The authentication chain.
#[derive(Clone)]
pub struct AuthenticationService {
    handlers: Arc<Vec<Arc<dyn AuthenticationHandler>>>,
}

impl AuthenticationService {
    pub fn new(handlers: Vec<Arc<dyn AuthenticationHandler>>) -> AuthenticationService {
        AuthenticationService {
            handlers: Arc::new(handlers),
        }
    }

    /// Basic, then Digest.
    pub fn basic_and_digest(nonces: Arc<dyn NonceProvider>) -> AuthenticationService {
        AuthenticationService::new(vec![
            Arc::new(BasicAuthHandler::new()),
            Arc::new(DigestAuthHandler::new(nonces)),
        ])
    }

    /// Establish who is making the request.
    ///
    /// `None` means nobody tried to authenticate. Otherwise the status says
    /// whether the credentials were accepted; accepted credentials are
    /// attached to `req`.
    pub fn authenticate(
        &self,
        res: &dyn DavResource,
        req: &mut DavRequest,
    ) -> DavResult<Option<AuthStatus>> {
        if let Some(auth) = req.auth().filter(|a| a.is_tagged()) {
            trace!("request is pre-authenticated as {:?}", auth.user);
            return Ok(Some(AuthStatus {
                auth: Some(auth.clone()),
                login_failed: false,
            }));
        }
        let handler = match self.handlers.iter().find(|h| h.supports(res, req)) {
            Some(h) => h,
            None => {
                trace!("no authentication handler supports the request");
                return Ok(None);
            }
        };
        match handler.authenticate(res, req)? {
            None => {
                debug!("authentication failed for {:?}", req.auth());
                Ok(Some(AuthStatus {
                    auth: req.auth().cloned(),
                    login_failed: true,
                }))
            }
            Some(tag) => {
                let mut auth = req
                    .auth()
                    .cloned()
                    .unwrap_or_else(|| Auth::new(AuthScheme::Form, None));
                auth.tag = Some(tag);
                debug!("authenticated {:?}", auth.user);
                req.set_auth(auth.clone());
                Ok(Some(AuthStatus {
                    auth: Some(auth),
                    login_failed: false,
                }))
            }
        }
    }

    /// One challenge per handler compatible with `res`.
    pub fn challenges(&self, res: &dyn DavResource, req: &DavRequest) -> Vec<String> {
        self.handlers
            .iter()
            .filter(|h| h.is_compatible(res))
            .filter_map(|h| h.challenge(res, req))
            .collect()
    }
}

impl Default for AuthenticationService {
    fn default() -> Self {
        AuthenticationService::new(vec![Arc::new(BasicAuthHandler::new())])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::davpath::DavPath;
    use crate::resource::Caps;
    use http::Request;

    #[derive(Debug)]
    pub(crate) struct Door;

    impl DavResource for Door {
        fn name(&self) -> String {
            "door".to_string()
        }
        fn caps(&self) -> Caps {
            Caps::GETTABLE
        }
        fn realm(&self) -> String {
            "house".to_string()
        }
        fn authenticate_basic(&self, user: &str, password: &str) -> Option<AuthTag> {
            if user == "alice" && password == "secret" {
                Some(Arc::new(user.to_string()))
            } else {
                None
            }
        }
    }

    pub(crate) fn request(authorization: Option<&str>) -> DavRequest {
        let mut b = Request::builder().method("GET").uri("/door");
        if let Some(a) = authorization {
            b = b.header("authorization", a);
        }
        DavRequest::new(
            b.body(()).unwrap(),
            DavMethod::GET,
            DavPath::new("/door").unwrap(),
        )
    }

    fn service() -> AuthenticationService {
        AuthenticationService::basic_and_digest(Arc::new(MemNonceProvider::default()))
    }

    #[test]
    fn anonymous_is_not_a_failure() {
        let mut req = request(None);
        assert!(service().authenticate(&Door, &mut req).unwrap().is_none());
    }

    #[test]
    fn good_basic_credentials_tag_the_request() {
        // alice:secret
        let mut req = request(Some("Basic YWxpY2U6c2VjcmV0"));
        let st = service().authenticate(&Door, &mut req).unwrap().unwrap();
        assert!(!st.login_failed);
        assert_eq!(req.user(), Some("alice"));
        assert!(req.auth().unwrap().is_tagged());
    }

    #[test]
    fn bad_basic_credentials_fail_login() {
        // alice:wrong
        let mut req = request(Some("Basic YWxpY2U6d3Jvbmc="));
        let st = service().authenticate(&Door, &mut req).unwrap().unwrap();
        assert!(st.login_failed);
        assert_eq!(st.auth.unwrap().user.as_deref(), Some("alice"));
        assert_eq!(req.user(), None);
    }

    #[test]
    fn pre_authenticated_short_circuits() {
        let mut req = request(Some("Basic YWxpY2U6d3Jvbmc="));
        req.set_auth(Auth::pre_authenticated("carol"));
        let st = service().authenticate(&Door, &mut req).unwrap().unwrap();
        assert!(!st.login_failed);
        assert_eq!(req.user(), Some("carol"));
    }

    #[test]
    fn every_compatible_handler_challenges() {
        let req = request(None);
        let ch = service().challenges(&Door, &req);
        assert_eq!(ch.len(), 2);
        assert_eq!(ch[0], "Basic realm=\"house\"");
        assert!(ch[1].starts_with("Digest realm=\"house\", nonce=\""));
    }
}
