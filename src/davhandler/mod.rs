//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::{self, buf::Buf, Bytes};
use futures_util::stream::Stream;
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, LOCATION, WWW_AUTHENTICATE};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::auth::{Auth, AuthenticationService};
use crate::body::{Body, StreamBody};
use crate::context::{self, DavRequest};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::events::{DavEvent, EventListener, EventManager};
use crate::props::{
    DavPropertySource, DeadPropertySource, DefaultPropertyAuthoriser, PropertyAuthoriser,
    PropertySource,
};
use crate::quota::StorageChecker;
use crate::resource::{required_caps, Caps, ResourceFactory};
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::DavResult;

mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_move;
mod handle_options;
mod handle_post;
mod handle_props;
mod handle_put;
mod pipeline;

pub use pipeline::{MacFinderPolicy, UserAgentPolicy};

/// Default size of the chunks a GET body is sent in.
pub const READ_BUF_SIZE: usize = 16384;

// Largest body we accept for anything but PUT and PATCH.
const MAX_XML_BODY: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Where resources come from.
    factory: Arc<dyn ResourceFactory>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// The authentication chain.
    auth: AuthenticationService,
    /// Property sources, highest priority first.
    props: Vec<Arc<dyn PropertySource>>,
    prop_authoriser: Arc<dyn PropertyAuthoriser>,
    storage: Vec<Arc<dyn StorageChecker>>,
    listeners: Vec<Arc<dyn EventListener>>,
    ua_policy: Arc<dyn UserAgentPolicy>,
    /// Does GET on a collection return an index.
    autoindex: bool,
    /// read buffer size in bytes
    read_buf_size: usize,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(factory: Arc<dyn ResourceFactory>) -> DavBuilder {
        Self {
            prefix: String::new(),
            factory,
            allow: DavMethodSet::all(),
            auth: AuthenticationService::default(),
            props: vec![Arc::new(DavPropertySource), Arc::new(DeadPropertySource)],
            prop_authoriser: Arc::new(DefaultPropertyAuthoriser),
            storage: Vec::new(),
            listeners: Vec::new(),
            ua_policy: Arc::new(MacFinderPolicy),
            autoindex: false,
            read_buf_size: READ_BUF_SIZE,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before resolving the rest of
    /// the request path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// The authentication chain (default is Basic only).
    pub fn authentication(self, auth: AuthenticationService) -> Self {
        let mut this = self;
        this.auth = auth;
        this
    }

    /// Append a property source. It is consulted after the ones already
    /// configured, so it only sees names nobody before it claimed.
    pub fn property_source(self, source: Arc<dyn PropertySource>) -> Self {
        let mut this = self;
        this.props.push(source);
        this
    }

    /// Replace the whole list of property sources.
    pub fn property_sources(self, sources: Vec<Arc<dyn PropertySource>>) -> Self {
        let mut this = self;
        this.props = sources;
        this
    }

    pub fn property_authoriser(self, authoriser: Arc<dyn PropertyAuthoriser>) -> Self {
        let mut this = self;
        this.prop_authoriser = authoriser;
        this
    }

    /// Add a storage checker, consulted before content is written.
    pub fn storage_checker(self, checker: Arc<dyn StorageChecker>) -> Self {
        let mut this = self;
        this.storage.push(checker);
        this
    }

    pub fn event_listener(self, listener: Arc<dyn EventListener>) -> Self {
        let mut this = self;
        this.listeners.push(listener);
        this
    }

    /// Client quirks (default is [`MacFinderPolicy`]).
    pub fn user_agent_policy(self, policy: Arc<dyn UserAgentPolicy>) -> Self {
        let mut this = self;
        this.ua_policy = policy;
        this
    }

    /// Does a GET on a collection produce an index.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size;
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` method is used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) factory: Arc<dyn ResourceFactory>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) auth: AuthenticationService,
    pub(crate) props: Arc<Vec<Arc<dyn PropertySource>>>,
    pub(crate) prop_authoriser: Arc<dyn PropertyAuthoriser>,
    pub(crate) storage: Arc<Vec<Arc<dyn StorageChecker>>>,
    pub(crate) events: EventManager,
    pub(crate) ua_policy: Arc<dyn UserAgentPolicy>,
    pub(crate) autoindex: bool,
    pub(crate) read_buf_size: usize,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            factory: cfg.factory,
            allow: cfg.allow,
            principal: None,
            auth: cfg.auth,
            props: Arc::new(cfg.props),
            prop_authoriser: cfg.prop_authoriser,
            storage: Arc::new(cfg.storage),
            events: EventManager::new(cfg.listeners),
            ua_policy: cfg.ua_policy,
            autoindex: cfg.autoindex,
            read_buf_size: cfg.read_buf_size,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(factory: Arc<dyn ResourceFactory>) -> DavBuilder {
        DavBuilder::new(factory)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// `prefix` is appended to the configured prefix. `principal` is an
    /// identity the caller already established; the request is treated
    /// as authenticated as that user.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.with_overrides(prefix, principal).handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.with_overrides(prefix, principal)
            .handle_inner(req)
            .await
    }

    fn with_overrides(&self, prefix: Option<String>, principal: Option<String>) -> DavHandler {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this
    }
}

impl DavHandler {
    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Bytes>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|e| {
                debug!("error reading request body: {}", e);
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(Bytes::from(data))
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return error_response(e);
            }
        };
        self.events.fire(DavEvent::RequestReceived {
            method,
            path: req.uri().path().to_string(),
        });

        // Turn any DavError results into a HTTP error response.
        let resp = match self.handle2(req, method).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                error_response(err)
            }
        };
        self.events.fire(DavEvent::ResponseSent {
            method,
            status: resp.status().as_u16(),
        });
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        method: DavMethod,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // The whole body is read before anything else happens, so a
        // client that goes away halfway through a PUT changes nothing.
        let max = if method.intersects(DavMethod::PUT | DavMethod::PATCH) {
            usize::MAX
        } else {
            MAX_XML_BODY
        };
        let body = self.read_request(body, max).await?;

        // Not all methods accept a body.
        if !DavMethod::WITH_BODY.contains(method) && !body.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {} {}", method.name(), path);

        let mut req = DavRequest::new(req, method, path);
        if let Some(principal) = &self.principal {
            req.set_auth(Auth::pre_authenticated(principal.as_str()));
        }
        let info = req.info();
        context::scope(info, self.dispatch(req, body)).await
    }

    // internal dispatcher part 3: find the resource and run the method.
    async fn dispatch(&self, mut req: DavRequest, body: Bytes) -> DavResult<Response<Body>> {
        let method = req.method();
        let res = self.resolve(&req, &req.path().as_str()).await?;

        // these can target a name that does not exist (yet).
        if method == DavMethod::OPTIONS {
            return self.handle_options(&mut req, res).await;
        }
        if method.intersects(DavMethod::PUT | DavMethod::PATCH) {
            return self.handle_put(&mut req, res, body).await;
        }
        if method == DavMethod::MKCOL {
            return self.handle_mkcol(&mut req, res).await;
        }
        if method == DavMethod::LOCK {
            return self.handle_lock(&mut req, res, &body).await;
        }

        let res = match res {
            Some(res) => res,
            None => {
                debug!("{} {}: not found", method.name(), req.path());
                return Err(DavError::NotFound);
            }
        };
        let _guard = self.events.process_resource(method, res.name());

        let is_get = method.intersects(DavMethod::GET | DavMethod::HEAD);
        let collection_index = is_get
            && self.autoindex
            && res.caps().contains(Caps::COLLECTION);
        let caps = if collection_index {
            Caps::COLLECTION
        } else {
            required_caps(method)
        };
        self.preflight(&mut req, res.as_ref(), caps)?;

        let res = res.as_ref();
        let result = if is_get {
            self.handle_get(&req, res).await
        } else if method == DavMethod::PROPFIND {
            self.handle_propfind(&req, res, &body).await
        } else if method == DavMethod::PROPPATCH {
            self.handle_proppatch(&req, res, &body).await
        } else if method == DavMethod::DELETE {
            self.handle_delete(&req, res).await
        } else if method == DavMethod::MOVE {
            self.handle_move(&req, res).await
        } else if method == DavMethod::UNLOCK {
            self.handle_unlock(&req, res).await
        } else if method == DavMethod::POST {
            self.handle_post(&req, res, &body).await
        } else {
            Err(DavError::UnknownDavMethod)
        };
        result.map_err(|e| self.with_challenges(e, &req, res))
    }
}

/// Error to response. Never has a body.
fn error_response(err: DavError) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = err.statuscode();
    let h = resp.headers_mut();
    h.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    match &err {
        DavError::NotAuthorized(challenges) => {
            for c in challenges {
                match HeaderValue::from_str(c) {
                    Ok(v) => {
                        h.append(WWW_AUTHENTICATE, v);
                    }
                    Err(_) => warn!("unusable challenge {:?}", c),
                }
            }
        }
        DavError::Redirect(url) => {
            if let Ok(v) = HeaderValue::from_str(url) {
                h.insert(LOCATION, v);
            }
        }
        _ => {}
    }
    if err.must_close() {
        h.insert(CONNECTION, HeaderValue::from_static("close"));
    }
    resp
}
