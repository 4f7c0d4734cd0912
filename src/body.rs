//! Response body, plus the adapter that lets the handler read request
//! bodies that arrive as a plain `Stream`.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

use pin_project::pin_project;

/// The body of every response the handler produces.
///
/// Most responses are a single buffer (or nothing at all). GET on a large
/// resource streams its content in chunks. `Body` implements both
/// `Stream` and `http_body::Body`, so it can be handed to hyper directly.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Full(Option<Bytes>),
    Chunked(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body {
            kind: Kind::Full(None),
        }
    }

    /// A body that is produced piecemeal.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            kind: Kind::Chunked(stream.boxed()),
        }
    }

    fn full(data: Bytes) -> Body {
        let data = if data.is_empty() { None } else { Some(data) };
        Body {
            kind: Kind::Full(data),
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.kind {
            Kind::Full(ref mut data) => Poll::Ready(data.take().map(Ok)),
            Kind::Chunked(ref mut stream) => stream.poll_next_unpin(cx),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.kind {
            Kind::Full(ref data) => {
                let n = data.is_some() as usize;
                (n, Some(n))
            }
            Kind::Chunked(ref stream) => stream.size_hint(),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, Kind::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match self.kind {
            Kind::Full(ref data) => {
                SizeHint::with_exact(data.as_ref().map(|d| d.len() as u64).unwrap_or(0))
            }
            Kind::Chunked(_) => SizeHint::default(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Body {
        Body::full(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Body {
        Body::full(Bytes::from(data))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::full(Bytes::from(s))
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Body {
        Body::full(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// Wraps a request body `Stream` so it can be read as an `http_body::Body`.
#[pin_project]
pub(crate) struct StreamBody<S> {
    #[pin]
    inner: S,
}

impl<S> StreamBody<S> {
    pub(crate) fn new(inner: S) -> StreamBody<S> {
        StreamBody { inner }
    }
}

impl<S, D, E> HttpBody for StreamBody<S>
where
    S: Stream<Item = Result<D, E>>,
    D: Buf + Send,
    E: StdError + Send + Sync + 'static,
{
    type Data = D;
    type Error = E;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<D, E>>> {
        self.project().inner.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, E>> {
        Poll::Ready(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_body_yields_once() {
        let mut body = Body::from("hello");
        assert!(!HttpBody::is_end_stream(&body));
        assert_eq!(HttpBody::size_hint(&body).exact(), Some(5));
        let chunk = body.next().await.unwrap().unwrap();
        assert_eq!(chunk, Bytes::from_static(b"hello"));
        assert!(body.next().await.is_none());
        assert!(HttpBody::is_end_stream(&body));
    }

    #[tokio::test]
    async fn empty_string_is_empty_body() {
        let body = Body::from(String::new());
        assert!(HttpBody::is_end_stream(&body));
    }

    #[tokio::test]
    async fn chunked_body_passes_through() {
        let parts = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let body = Body::stream(futures_util::stream::iter(parts));
        let all: Vec<Bytes> = body.map(|c| c.unwrap()).collect().await;
        assert_eq!(all.concat(), b"abcd");
    }
}
