use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::davheaders::Depth;
use crate::errors::DavError;
use crate::events::DavEvent;
use crate::props::xmlwrite::multistatus;
use crate::props::{do_prop_patch, PatchOp, PropFindPropertyBuilder, PropFindResponse, PropertiesRequest};
use crate::resource::DavResource;
use crate::xmltree_ext::parse_body;
use crate::DavResult;

fn multistatus_response(responses: &[PropFindResponse]) -> DavResult<Response<Body>> {
    let body = multistatus(responses)?;
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = StatusCode::MULTI_STATUS;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    Ok(resp)
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let depth = req
            .headers()
            .typed_get::<Depth>()
            .unwrap_or(Depth::Infinity);
        let elem = parse_body(body)?;
        let request = PropertiesRequest::from_xml(elem.as_ref())?;
        let href = req.path().as_url_string_with_prefix();
        debug!("PROPFIND {} depth {:?}: {:?}", href, depth, request);

        let builder = PropFindPropertyBuilder::new(self.props.clone());
        let responses = builder
            .build_properties(res, &href, depth.levels(), &request)
            .await?;
        multistatus_response(&responses)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let ops = match parse_body(body)? {
            Some(elem) => PatchOp::parse(&elem)?,
            None => return Err(DavError::BadRequest("PROPPATCH without a body".to_string())),
        };
        let href = req.path().as_url_string_with_prefix();
        let response = do_prop_patch(
            req,
            res,
            &href,
            &ops,
            &self.props,
            self.prop_authoriser.as_ref(),
        )?;
        self.events.fire(DavEvent::PropPatch { href });
        multistatus_response(&[response])
    }
}
