//! Per-request context.
//!
//! A [`DavRequest`] is handed down explicitly from the dispatcher to the
//! method handlers and the property engine. For code that has no way to
//! get at it, [`current`] returns a read-only snapshot, but only while a
//! request is being processed on the current task.
use std::future::Future;
use std::sync::Arc;

use headers::HeaderMapExt;
use http::{HeaderMap, Request, Uri};
use parking_lot::RwLock;

use crate::auth::Auth;
use crate::davpath::DavPath;
use crate::util::DavMethod;

tokio::task_local! {
    static CURRENT: Arc<RequestInfo>;
}

/// Read-only view of the request currently being processed.
#[derive(Debug)]
pub struct RequestInfo {
    pub method: DavMethod,
    pub uri: Uri,
    pub host: String,
    user: RwLock<Option<String>>,
}

impl RequestInfo {
    /// The authenticated user, once authentication has run.
    pub fn user(&self) -> Option<String> {
        self.user.read().clone()
    }
}

/// The request being processed, if any.
pub fn current() -> Option<Arc<RequestInfo>> {
    CURRENT.try_with(|c| c.clone()).ok()
}

pub(crate) async fn scope<F: Future>(info: Arc<RequestInfo>, f: F) -> F::Output {
    CURRENT.scope(info, f).await
}

/// A request, minus its body, plus what we learned about it.
#[derive(Debug)]
pub struct DavRequest {
    req: Request<()>,
    method: DavMethod,
    path: DavPath,
    host: String,
    auth: Option<Auth>,
    info: Arc<RequestInfo>,
}

impl DavRequest {
    pub fn new(req: Request<()>, method: DavMethod, path: DavPath) -> DavRequest {
        let host = req
            .headers()
            .typed_get::<headers::Host>()
            .map(|h| h.hostname().to_string())
            .or_else(|| req.uri().host().map(|h| h.to_string()))
            .unwrap_or_default();
        let auth = Auth::from_headers(req.headers(), method);
        let info = Arc::new(RequestInfo {
            method,
            uri: req.uri().clone(),
            host: host.clone(),
            user: RwLock::new(None),
        });
        DavRequest {
            req,
            method,
            path,
            host,
            auth,
            info,
        }
    }

    pub fn method(&self) -> DavMethod {
        self.method
    }

    pub fn uri(&self) -> &Uri {
        self.req.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.req.headers()
    }

    pub fn path(&self) -> &DavPath {
        &self.path
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
    }

    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// Authenticated user name. Only set once a handler accepted the
    /// credentials.
    pub fn user(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .filter(|a| a.is_tagged())
            .and_then(|a| a.user.as_deref())
    }

    /// Attach the identity for the rest of this request.
    pub fn set_auth(&mut self, auth: Auth) {
        if auth.is_tagged() {
            *self.info.user.write() = auth.user.clone();
        }
        self.auth = Some(auth);
    }

    pub(crate) fn info(&self) -> Arc<RequestInfo> {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_scoped_to_one_request() {
        assert!(current().is_none());
        let req = Request::builder()
            .method("PROPFIND")
            .uri("/a")
            .header("host", "example.com:8080")
            .body(())
            .unwrap();
        let path = DavPath::new("/a").unwrap();
        let mut dr = DavRequest::new(req, DavMethod::PROPFIND, path);
        assert_eq!(dr.host(), "example.com");
        let info = dr.info();
        scope(info, async {
            let c = current().unwrap();
            assert_eq!(c.method, DavMethod::PROPFIND);
            assert_eq!(c.host, "example.com");
            assert!(c.user().is_none());
            dr.set_auth(Auth::pre_authenticated("bob"));
            assert_eq!(current().unwrap().user().as_deref(), Some("bob"));
        })
        .await;
        assert!(current().is_none());
        assert_eq!(dr.user(), Some("bob"));
    }
}
