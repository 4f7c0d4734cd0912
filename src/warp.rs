//! Adapter for the `warp` HTTP server framework.
//!
//! The filter in this module always succeeds. A request the handler
//! cannot serve becomes an error reply, never a warp rejection.
//!
use std::convert::Infallible;

use crate::DavHandler;
use warp::{filters::BoxedFilter, Filter, Reply};

/// Reply-filter that runs a DavHandler.
///
/// The part of the request path matched before this filter is used as
/// an extra prefix.
pub fn dav_handler(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    use http::header::HeaderMap;
    use http::{Response, StatusCode};
    use warp::path::{FullPath, Tail};

    warp::method()
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and_then(
            move |method, path_full: FullPath, path_tail: Tail, headers: HeaderMap, body| {
                let handler = handler.clone();

                async move {
                    let path_str = path_full.as_str();
                    let mut builder = http::Request::builder().method(method).uri(path_str);
                    for (k, v) in headers.iter() {
                        builder = builder.header(k, v);
                    }
                    let request = match builder.body(body) {
                        Ok(r) => r,
                        Err(e) => {
                            debug!("warp: cannot rebuild request for {}: {}", path_str, e);
                            let mut resp = Response::new(hyper::Body::empty());
                            *resp.status_mut() = StatusCode::BAD_REQUEST;
                            return Ok::<_, Infallible>(resp);
                        }
                    };

                    let matched = path_str.len() - path_tail.as_str().len();
                    let prefix = path_str[..matched].to_string();
                    let response = handler
                        .handle_stream_with(request, Some(prefix), None)
                        .await;

                    // our Body is a Stream, hyper wants its own.
                    let (parts, body) = response.into_parts();
                    let response = Response::from_parts(parts, hyper::Body::wrap_stream(body));
                    Ok::<_, Infallible>(response)
                }
            },
        )
        .boxed()
}
