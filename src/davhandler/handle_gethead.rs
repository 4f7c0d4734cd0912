use std::io;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE, ETAG};
use http::{Response, StatusCode};

use crate::body::Body;
use crate::context::DavRequest;
use crate::davpath::encode_segment;
use crate::resource::{Caps, DavResource};
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
    ) -> DavResult<Response<Body>> {
        let head = req.method() == DavMethod::HEAD;
        if res.caps().contains(Caps::COLLECTION) && self.autoindex {
            return self.handle_autoindex(req, res, head).await;
        }

        let mut resp = Response::new(Body::empty());
        let h = resp.headers_mut();
        let ctype = res
            .content_type()
            .or_else(|| mime_guess::from_path(res.name()).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if let Ok(v) = HeaderValue::from_str(&ctype) {
            h.insert(CONTENT_TYPE, v);
        }
        if let Some(etag) = res.etag() {
            if let Ok(v) = HeaderValue::from_str(&etag) {
                h.insert(ETAG, v);
            }
        }
        if let Some(modified) = res.modified() {
            h.typed_insert(headers::LastModified::from(modified));
        }

        let data = res.get_content().await?;
        resp.headers_mut()
            .typed_insert(headers::ContentLength(data.len() as u64));
        if head {
            return Ok(resp);
        }

        let chunk = self.read_buf_size.max(1);
        *resp.body_mut() = Body::stream(async_stream::stream! {
            let mut data = data;
            while !data.is_empty() {
                let n = chunk.min(data.len());
                yield Ok::<Bytes, io::Error>(data.split_to(n));
            }
        });
        Ok(resp)
    }

    async fn handle_autoindex(
        &self,
        req: &DavRequest,
        res: &dyn DavResource,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let mut base = req.path().as_url_string_with_prefix();
        if !base.ends_with('/') {
            base.push('/');
        }
        let upath = htmlescape::encode_minimal(&req.path().as_str());

        let mut children = res.children().await?;
        children.sort_by_key(|c| (!c.caps().contains(Caps::COLLECTION), c.name()));

        let mut w = String::new();
        w.push_str(
            "<html><head>\n\
             <meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
        );
        w.push_str(&format!("<title>Index of {upath}</title>\n"));
        w.push_str("</head><body>\n");
        w.push_str(&format!("<h1>Index of {upath}</h1>\n"));
        w.push_str("<table>\n<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n");
        if !req.path().is_root() {
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td></td><td></td></tr>\n");
        }
        for child in &children {
            let is_coll = child.caps().contains(Caps::COLLECTION);
            let name = child.name();
            let (href, shown) = if is_coll {
                (format!("{}{}/", base, encode_segment(&name)), format!("{name}/"))
            } else {
                (format!("{}{}", base, encode_segment(&name)), name)
            };
            let modified = child
                .modified()
                .map(crate::util::systemtime_to_httpdate)
                .unwrap_or_default();
            let size = if is_coll {
                "[DIR]".to_string()
            } else {
                child.content_length().map(|n| n.to_string()).unwrap_or_default()
            };
            w.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>\n",
                htmlescape::encode_attribute(&href),
                htmlescape::encode_minimal(&shown),
                modified,
                size
            ));
        }
        w.push_str("</table></body></html>\n");

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::OK;
        let h = resp.headers_mut();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        h.typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *resp.body_mut() = Body::from(w);
        }
        Ok(resp)
    }
}
