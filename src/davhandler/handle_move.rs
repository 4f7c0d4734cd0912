use headers::HeaderMapExt;
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::davheaders::{self, Dest};
use crate::errors::DavError;
use crate::events::DavEvent;
use crate::resource::{Caps, DavResource};
use crate::DavResult;

use super::handle_delete::locked_below;

impl crate::DavHandler {
    pub(crate) async fn handle_move(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
    ) -> DavResult<Response<Body>> {
        let dest = match req.headers().typed_get::<davheaders::Destination>() {
            Some(d) => Dest::parse(&d.0, req.host(), &self.prefix)?,
            None => return Err(DavError::BadRequest("MOVE without Destination".to_string())),
        };
        let from = req.path().as_str();
        let to = dest.path.as_str();
        if from == to {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        if to.starts_with(&format!("{}/", from.trim_end_matches('/'))) {
            return Err(DavError::Conflict("cannot move into itself".to_string()));
        }

        let dest_parent = match self.factory.resolve(&dest.host, &dest.parent_url()).await? {
            Some(p) if p.caps().contains(Caps::COLLECTION) => p,
            _ => {
                debug!("MOVE {} -> {}: no destination collection", from, dest);
                return Err(DavError::Conflict("destination collection missing".to_string()));
            }
        };

        let mut deleted = false;
        if let Some(existing) = self.factory.resolve(&dest.host, &to).await? {
            // only an explicit `Overwrite: T` allows replacing.
            let overwrite = req
                .headers()
                .typed_get::<davheaders::Overwrite>()
                .map(|o| o.0)
                .unwrap_or(false);
            if !overwrite && !self.ua_policy.implicit_overwrite(req) {
                debug!("MOVE {} -> {}: destination exists", from, dest);
                return Err(DavError::PreconditionFailed);
            }
            if !existing.caps().contains(Caps::DELETABLE) {
                return Err(DavError::Conflict("destination cannot be replaced".to_string()));
            }
            if locked_below(req, existing.as_ref()).await? {
                return Err(DavError::Locked);
            }
            existing.delete().await?;
            self.events.fire(DavEvent::Delete { path: to.clone() });
            deleted = true;
        }

        self.events.fire(DavEvent::Move {
            from: from.clone(),
            to: to.clone(),
        });
        res.move_to(dest_parent.as_ref(), dest.name()).await?;
        debug!("MOVE {} -> {}: done", from, to);

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = if deleted {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(resp)
    }
}
