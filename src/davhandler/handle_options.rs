use http::header::{HeaderValue, ALLOW, CONTENT_LENGTH};
use http::Response;

use crate::body::Body;
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::resource::{required_caps, Caps, DavResource};
use crate::util::DavMethod;
use crate::DavResult;

// in the order they are listed in the Allow: header.
const METHODS: [DavMethod; 13] = [
    DavMethod::OPTIONS,
    DavMethod::HEAD,
    DavMethod::GET,
    DavMethod::POST,
    DavMethod::PUT,
    DavMethod::PATCH,
    DavMethod::PROPFIND,
    DavMethod::PROPPATCH,
    DavMethod::MKCOL,
    DavMethod::MOVE,
    DavMethod::DELETE,
    DavMethod::LOCK,
    DavMethod::UNLOCK,
];

impl crate::DavHandler {
    pub(crate) async fn handle_options(
        &self,
        req: &mut DavRequest,
        res: Option<Box<dyn DavResource>>,
    ) -> DavResult<Response<Body>> {
        let mut resp = Response::new(Body::empty());

        let h = resp.headers_mut();
        h.insert("DAV", HeaderValue::from_static("1, 2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

        let mut v = Vec::new();
        match res {
            _ if req.path().is_star() => {
                v.extend(METHODS.iter().filter(|m| self.allow.contains(**m)).map(|m| m.name()));
            }
            Some(res) => {
                let _guard = self.events.process_resource(req.method(), res.name());
                self.preflight(req, res.as_ref(), Caps::empty())?;
                let caps = res.caps();
                let lock_null = caps.contains(Caps::LOCK_NULL);
                for m in METHODS {
                    let needs = if m == DavMethod::MKCOL || (m == DavMethod::PUT && lock_null) {
                        // a lock-null name can still be created, others exist.
                        if !lock_null {
                            continue;
                        }
                        Caps::LOCK_NULL
                    } else if (m == DavMethod::GET || m == DavMethod::HEAD)
                        && self.autoindex
                        && caps.contains(Caps::COLLECTION)
                    {
                        Caps::COLLECTION
                    } else {
                        required_caps(m)
                    };
                    if caps.contains(needs) && res.is_compatible(m) && self.allow.contains(m) {
                        v.push(m.name());
                    }
                }
            }
            None => {
                // unmapped: only what can create it.
                for m in [DavMethod::OPTIONS, DavMethod::MKCOL, DavMethod::PUT, DavMethod::LOCK] {
                    if self.allow.contains(m) {
                        v.push(m.name());
                    }
                }
            }
        }

        let a = HeaderValue::from_str(&v.join(", "))
            .map_err(|e| DavError::Internal(format!("Allow header: {e}")))?;
        resp.headers_mut().insert(ALLOW, a);

        Ok(resp)
    }
}
