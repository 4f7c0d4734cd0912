use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::events::DavEvent;
use crate::ls::is_locked_out;
use crate::resource::{Caps, DavResource};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(
        &self,
        req: &mut DavRequest,
        res: Option<Box<dyn DavResource>>,
    ) -> DavResult<Response<Body>> {
        if let Some(res) = &res {
            if !res.caps().contains(Caps::LOCK_NULL) {
                debug!("MKCOL {}: already exists", req.path());
                return Err(DavError::MethodNotAllowed);
            }
        }
        let name = match req.path().file_name() {
            Some(n) => n.to_string(),
            None => return Err(DavError::MethodNotAllowed),
        };
        let parent = match self.resolve(req, &req.path().parent().as_str()).await? {
            Some(p) if p.caps().contains(Caps::COLLECTION) => p,
            _ => {
                debug!("MKCOL {}: no parent collection", req.path());
                return Err(DavError::Conflict("parent collection missing".to_string()));
            }
        };
        let _guard = self.events.process_resource(req.method(), parent.name());

        let r = self.mkcol_in(req, parent.as_ref(), res.as_deref(), &name).await;
        r.map_err(|e| self.with_challenges(e, req, parent.as_ref()))
    }

    async fn mkcol_in(
        &self,
        req: &mut DavRequest,
        parent: &dyn DavResource,
        placeholder: Option<&dyn DavResource>,
        name: &str,
    ) -> DavResult<Response<Body>> {
        self.preflight(req, parent, Caps::MAKE_COLLECTION)?;
        if let Some(p) = placeholder {
            if is_locked_out(req, p) {
                return Err(DavError::Locked);
            }
        }
        parent.create_collection(name).await?;
        self.events.fire(DavEvent::NewFolder {
            path: req.path().as_str(),
        });
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::CREATED;
        Ok(resp)
    }
}
