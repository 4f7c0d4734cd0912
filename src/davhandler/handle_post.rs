use bytes::Bytes;
use http::header::{HeaderValue, LOCATION};
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::resource::DavResource;
use crate::DavResult;

impl crate::DavHandler {
    // form posts: urlencoded parameters go to the resource, which may
    // ask for a redirect.
    pub(crate) async fn handle_post(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let mut params: Vec<(String, String)> =
            url::form_urlencoded::parse(body).into_owned().collect();
        if let Some(query) = req.uri().query() {
            params.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());
        }
        trace!("POST {}: {} parameters", req.path(), params.len());

        let mut resp = Response::new(Body::empty());
        match res.process_form(params).await? {
            Some(url) => {
                let v = HeaderValue::from_str(&url)
                    .map_err(|_| DavError::Internal(format!("bad redirect {url}")))?;
                *resp.status_mut() = StatusCode::FOUND;
                resp.headers_mut().insert(LOCATION, v);
            }
            None => *resp.status_mut() = StatusCode::OK,
        }
        Ok(resp)
    }
}
