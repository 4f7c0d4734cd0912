use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::events::DavEvent;
use crate::ls::is_locked_out;
use crate::quota;
use crate::resource::{ByteRange, Caps, DavResource};
use crate::util::DavMethod;
use crate::DavResult;

fn content_range(req: &DavRequest) -> DavResult<Option<ByteRange>> {
    let range = match req.headers().typed_try_get::<headers::ContentRange>() {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(None),
        Err(_) => return Err(DavError::BadRequest("bad Content-Range".to_string())),
    };
    match range.bytes_range() {
        Some((start, finish)) if start <= finish => Ok(Some(ByteRange { start, finish })),
        _ => Err(DavError::BadRequest("unsatisfiable Content-Range".to_string())),
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = code;
    resp
}

impl crate::DavHandler {
    pub(crate) async fn handle_put(
        &self,
        req: &mut DavRequest,
        res: Option<Box<dyn DavResource>>,
        body: Bytes,
    ) -> DavResult<Response<Body>> {
        let range = content_range(req)?;
        if req.method() == DavMethod::PATCH && range.is_none() {
            return Err(DavError::BadRequest("PATCH needs a Content-Range".to_string()));
        }
        match res {
            Some(res) if !res.caps().contains(Caps::LOCK_NULL) => {
                let _guard = self.events.process_resource(req.method(), res.name());
                let r = self.replace(req, res.as_ref(), range, body).await;
                r.map_err(|e| self.with_challenges(e, req, res.as_ref()))
            }
            placeholder => {
                if range.is_some() {
                    return Err(DavError::BadRequest("Content-Range on a new resource".to_string()));
                }
                self.create(req, placeholder, body).await
            }
        }
    }

    async fn replace(
        &self,
        req: &mut DavRequest,
        res: &dyn DavResource,
        range: Option<ByteRange>,
        body: Bytes,
    ) -> DavResult<Response<Body>> {
        let needs = if range.is_some() && res.caps().contains(Caps::PARTIAL_UPDATE) {
            Caps::PARTIAL_UPDATE
        } else {
            Caps::REPLACEABLE
        };
        self.preflight(req, res, needs)?;

        let parent = match req.path().is_root() {
            true => None,
            false => self.resolve(req, &req.path().parent().as_str()).await?,
        };
        if let Some(reason) = quota::check_on_replace(&self.storage, req, parent.as_deref(), res) {
            debug!("PUT {}: storage check failed: {:?}", req.path(), reason);
            return Err(DavError::InsufficientStorage(reason));
        }

        match range {
            None => res.replace_content(body).await?,
            Some(range) => {
                if range.len() != Some(body.len() as u64) {
                    return Err(DavError::BadRequest(
                        "Content-Range does not match the body".to_string(),
                    ));
                }
                if res.caps().contains(Caps::PARTIAL_UPDATE) {
                    res.replace_partial_content(range, body).await?;
                } else if res.caps().contains(Caps::GETTABLE) {
                    // splice into a copy of the current content.
                    let current = res.get_content().await?;
                    let data = range.splice(&current, &body)?;
                    res.replace_content(Bytes::from(data)).await?;
                } else {
                    return Err(DavError::BadRequest(
                        "resource does not take partial content".to_string(),
                    ));
                }
            }
        }
        self.events.fire(DavEvent::Put {
            path: req.path().as_str(),
        });
        Ok(status(StatusCode::NO_CONTENT))
    }

    async fn create(
        &self,
        req: &mut DavRequest,
        placeholder: Option<Box<dyn DavResource>>,
        body: Bytes,
    ) -> DavResult<Response<Body>> {
        let path = req.path().clone();
        let name = match path.file_name() {
            Some(n) => n.to_string(),
            None => return Err(DavError::MethodNotAllowed),
        };

        // nearest existing ancestor, and the names missing below it.
        let mut missing: Vec<String> = Vec::new();
        let mut parent_path = path.parent();
        let mut parent = loop {
            if let Some(p) = self.resolve(req, &parent_path.as_str()).await? {
                break p;
            }
            if parent_path.is_root() {
                debug!("PUT {}: root does not resolve", path);
                return Err(DavError::NotFound);
            }
            missing.push(parent_path.file_name().unwrap_or_default().to_string());
            parent_path = parent_path.parent();
        };
        let _guard = self.events.process_resource(req.method(), parent.name());

        if let Some(reason) =
            quota::check_on_add(&self.storage, req, Some(parent.as_ref()), &parent_path.as_str())
        {
            debug!("PUT {}: storage check failed: {:?}", path, reason);
            return Err(DavError::InsufficientStorage(reason));
        }

        if !missing.is_empty() {
            self.check_authorisation(req, parent.as_ref())
                .map_err(|e| self.with_challenges(e, req, parent.as_ref()))?;
        }
        let mut folder_path = parent_path;
        while let Some(seg) = missing.pop() {
            if !parent.caps().contains(Caps::MAKE_COLLECTION) {
                debug!("PUT {}: cannot create {} in {}", path, seg, parent.name());
                return Err(DavError::NotFound);
            }
            let created = parent.create_collection(&seg).await?;
            folder_path = folder_path.join(&seg);
            self.events.fire(DavEvent::NewFolder {
                path: folder_path.as_str(),
            });
            parent = created;
        }

        self.preflight(req, parent.as_ref(), Caps::PUTABLE)?;
        if let Some(p) = &placeholder {
            if is_locked_out(req, p.as_ref()) {
                return Err(DavError::Locked);
            }
        }

        let content_type = req
            .headers()
            .typed_get::<headers::ContentType>()
            .map(|c| c.to_string())
            .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()));
        parent.create_new(&name, body, content_type).await?;
        self.events.fire(DavEvent::Put {
            path: path.as_str(),
        });
        Ok(status(StatusCode::CREATED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davpath::DavPath;
    use http::Request;

    fn put(range: Option<&str>) -> DavRequest {
        let mut b = Request::builder().method("PUT").uri("/f");
        if let Some(r) = range {
            b = b.header("content-range", r);
        }
        DavRequest::new(
            b.body(()).unwrap(),
            DavMethod::PUT,
            DavPath::new("/f").unwrap(),
        )
    }

    #[test]
    fn content_ranges() {
        assert_eq!(content_range(&put(None)).unwrap(), None);
        assert_eq!(
            content_range(&put(Some("bytes 2-4/10"))).unwrap(),
            Some(ByteRange { start: 2, finish: 4 })
        );
        assert_eq!(
            content_range(&put(Some("bytes 2-4/*"))).unwrap(),
            Some(ByteRange { start: 2, finish: 4 })
        );
        assert!(content_range(&put(Some("lines 1-2"))).is_err());
    }
}
