//! ## WebDAV and HTTP authentication engine
//!
//! [`Webdav`] (RFC4918) is HTTP plus a set of extension methods
//! (PROPFIND, PROPPATCH, MKCOL, MOVE, LOCK, UNLOCK) for managing
//! collections of resources. This library is a `handler`: it takes an
//! `http::Request`, runs it against a tree of resources, and produces an
//! `http::Response`. It works with any server that speaks the `http` and
//! `http_body` types, like [hyper]. An adapter for [warp] is included.
//!
//! ## Resources.
//!
//! There is no filesystem underneath. Requests are resolved to
//! [resources][DavResource] by a [`ResourceFactory`] you supply, and what
//! a resource can do is described by its [capabilities][Caps]. A method
//! is only run against a resource that has the capabilities it needs.
//!
//! Included is [`MemFs`], an ephemeral in-memory resource tree that
//! supports dead properties and lock-null resources.
//!
//! ## The request pipeline.
//!
//! Every request goes through the same checks, in this order, before its
//! method handler runs:
//!
//! 1. capabilities and method compatibility (405)
//! 2. authentication and authorisation (401, with one challenge per
//!    compatible authentication scheme)
//! 3. redirect (302)
//! 4. write locks held by somebody else (423)
//!
//! ## Authentication.
//!
//! An [`AuthenticationService`] holds a chain of handlers. Basic
//! (RFC2617) is the default, [`AuthenticationService::basic_and_digest`]
//! adds Digest with nonces from a [`NonceProvider`]. Resources do the
//! actual password checks, usually by delegating to a [`SecurityManager`].
//!
//! ## Properties.
//!
//! PROPFIND and PROPPATCH go through a prioritized list of
//! [property sources][PropertySource]. The first source that knows a
//! property name owns it.
//!
//! ## Example.
//!
//! Example server using [hyper] that serves an in-memory tree.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use dav_engine::{memfs::MemFs, DavHandler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(MemFs::new()).build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving on {}", addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/
//! [warp]: https://crates.io/crates/warp

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod davhandler;
mod errors;
mod util;
mod xmltree_ext;

pub mod auth;
pub mod body;
pub mod context;
pub mod davheaders;
pub mod davpath;
pub mod events;
pub mod ls;
pub mod props;
pub mod quota;
pub mod resource;

#[cfg(any(docsrs, feature = "memfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

pub use crate::auth::{
    AuthenticationService, MemNonceProvider, NonceProvider, SecurityManager,
    SimpleSecurityManager,
};
pub use crate::davhandler::{DavBuilder, DavHandler, MacFinderPolicy, UserAgentPolicy};
pub use crate::errors::{DavError, DavResult};
pub use crate::events::{DavEvent, EventListener};
pub use crate::ls::{DavLockManager, MemLs};
pub use crate::props::PropertySource;
pub use crate::resource::{Caps, DavResource, ResourceFactory};
pub use crate::util::{DavMethod, DavMethodSet};

#[cfg(feature = "memfs")]
pub use crate::memfs::MemFs;
