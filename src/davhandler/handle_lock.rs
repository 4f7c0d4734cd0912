use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::davheaders::{self, Depth};
use crate::errors::DavError;
use crate::ls::{is_locked_out, LockDepth, LockInfo, LockTimeout, LockToken};
use crate::props::xmlwrite;
use crate::resource::{Caps, DavResource};
use crate::xmltree_ext::parse_body;
use crate::DavResult;

fn lock_depth(req: &DavRequest) -> DavResult<LockDepth> {
    match req.headers().typed_get::<Depth>() {
        Some(Depth::Zero) => Ok(LockDepth::Zero),
        Some(Depth::One) => Err(DavError::BadRequest("Depth: 1 is not valid for LOCK".to_string())),
        Some(Depth::Infinity) | None => Ok(LockDepth::Infinity),
    }
}

fn lock_info(req: &DavRequest, body: &Bytes, depth: LockDepth) -> DavResult<LockInfo> {
    match parse_body(body)? {
        Some(elem) => LockInfo::from_xml(&elem, depth, req.user()),
        None => Err(DavError::BadRequest("LOCK without a lockinfo body".to_string())),
    }
}

fn lock_response(req: &DavRequest, token: &LockToken, status: StatusCode) -> Response<Body> {
    let root = req.path().as_url_string_with_prefix();
    let body = xmlwrite::lock_response(token, &root);
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    let h = resp.headers_mut();
    h.typed_insert(davheaders::LockToken(token.token_id.clone()));
    h.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    resp
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &mut DavRequest,
        res: Option<Box<dyn DavResource>>,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let depth = lock_depth(req)?;
        let timeout = req
            .headers()
            .typed_get::<davheaders::Timeout>()
            .map(|t| t.0)
            .unwrap_or(LockTimeout::Infinite);

        match res {
            Some(res) => {
                let _guard = self.events.process_resource(req.method(), res.name());
                let r = self.lock_existing(req, res.as_ref(), body, depth, timeout).await;
                r.map_err(|e| self.with_challenges(e, req, res.as_ref()))
            }
            None => self.lock_unmapped(req, body, depth, timeout).await,
        }
    }

    async fn lock_existing(
        &self,
        req: &mut DavRequest,
        res: &dyn DavResource,
        body: &Bytes,
        depth: LockDepth,
        timeout: LockTimeout,
    ) -> DavResult<Response<Body>> {
        self.preflight(req, res, Caps::LOCKABLE)?;

        // an If: header with a token means refresh.
        let refresh = req
            .headers()
            .typed_get::<davheaders::If>()
            .filter(|h| !h.is_no_lock());
        let token = match refresh {
            Some(hdr) => {
                let tokens = hdr.tokens();
                let id = match tokens.first() {
                    Some(id) => id,
                    None => return Err(DavError::BadRequest("no lock token to refresh".to_string())),
                };
                debug!("LOCK {}: refresh {}", req.path(), id);
                res.refresh_lock(id)??
            }
            None => {
                let info = lock_info(req, body, depth)?;
                if is_locked_out(req, res) {
                    return Err(DavError::Locked);
                }
                res.lock(timeout, info)??
            }
        };
        Ok(lock_response(req, &token, StatusCode::OK))
    }

    // lock a name that does not exist yet, leaving a lock-null resource.
    async fn lock_unmapped(
        &self,
        req: &mut DavRequest,
        body: &Bytes,
        depth: LockDepth,
        timeout: LockTimeout,
    ) -> DavResult<Response<Body>> {
        let name = match req.path().file_name() {
            Some(n) => n.to_string(),
            None => return Err(DavError::NotFound),
        };
        let parent = match self.resolve(req, &req.path().parent().as_str()).await? {
            Some(p) => p,
            None => {
                debug!("LOCK {}: no parent collection", req.path());
                return Err(DavError::Conflict("parent does not exist".to_string()));
            }
        };
        let _guard = self.events.process_resource(req.method(), parent.name());

        let r = self
            .lock_in(req, parent.as_ref(), &name, body, depth, timeout)
            .await;
        r.map_err(|e| self.with_challenges(e, req, parent.as_ref()))
    }

    async fn lock_in(
        &self,
        req: &mut DavRequest,
        parent: &dyn DavResource,
        name: &str,
        body: &Bytes,
        depth: LockDepth,
        timeout: LockTimeout,
    ) -> DavResult<Response<Body>> {
        self.check_authorisation(req, parent)?;
        if is_locked_out(req, parent) {
            return Err(DavError::Locked);
        }
        if !parent.caps().contains(Caps::LOCKING_COLLECTION) {
            return Err(DavError::MethodNotAllowed);
        }
        let info = lock_info(req, body, depth)?;
        match parent.create_and_lock(name, timeout, info).await? {
            Some(token) => Ok(lock_response(req, &token, StatusCode::CREATED)),
            None => Err(DavError::Internal(format!(
                "{} did not return a lock for {}",
                parent.name(),
                name
            ))),
        }
    }

    pub(crate) async fn handle_unlock(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
    ) -> DavResult<Response<Body>> {
        let token = match req.headers().typed_get::<davheaders::LockToken>() {
            Some(t) => t.0,
            None => return Err(DavError::BadRequest("UNLOCK without Lock-Token".to_string())),
        };
        res.unlock(&token)?;
        debug!("UNLOCK {}: released {}", req.path(), token);
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::NO_CONTENT;
        Ok(resp)
    }
}
