use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::events::DavEvent;
use crate::ls::is_locked_out;
use crate::resource::{Caps, DavResource};
use crate::DavResult;

/// Is `res`, or anything below it, locked by someone else.
pub(crate) fn locked_below<'a>(
    req: &'a DavRequest,
    res: &'a dyn DavResource,
) -> BoxFuture<'a, DavResult<bool>> {
    async move {
        if is_locked_out(req, res) {
            return Ok(true);
        }
        if !res.caps().contains(Caps::COLLECTION) {
            return Ok(false);
        }
        for child in res.children().await? {
            if locked_below(req, child.as_ref()).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
    .boxed()
}

impl crate::DavHandler {
    pub(crate) async fn handle_delete(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
    ) -> DavResult<Response<Body>> {
        if locked_below(req, res).await? {
            debug!("DELETE {}: locked member", req.path());
            return Err(DavError::Locked);
        }
        res.delete().await?;
        self.events.fire(DavEvent::Delete {
            path: req.path().as_str(),
        });
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::NO_CONTENT;
        Ok(resp)
    }
}
