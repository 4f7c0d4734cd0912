//! The resource capability model.
//!
//! A resource is an opaque handle handed out by a [`ResourceFactory`]. What
//! it can do is described by its [`Caps`]; the dispatcher and the method
//! handlers test those flags and then call the matching trait methods. The
//! default implementations of the capability methods refuse with
//! "method not allowed", so a backend only implements what it advertises.
//!
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use bitflags::bitflags;
use bytes::Bytes;
use futures_util::future::{self, FutureExt};
use xmltree::Element;

use crate::auth::{Auth, AuthTag, DigestResponse};
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::ls::{LockInfo, LockResult, LockTimeout, LockToken};
use crate::props::PropName;
use crate::util::DavMethod;
use crate::DavResult;

pub type DavFuture<'a, T> = Pin<Box<dyn Future<Output = DavResult<T>> + Send + 'a>>;

bitflags! {
    /// What a resource can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Caps: u32 {
        const GETTABLE = 0x0001;
        const PUTABLE = 0x0002;
        const COLLECTION = 0x0004;
        const LOCKABLE = 0x0008;
        const MOVABLE = 0x0010;
        const REPLACEABLE = 0x0020;
        const DELETABLE = 0x0040;
        const PROPFINDABLE = 0x0080;
        const MAKE_COLLECTION = 0x0100;
        /// Can create a locked, empty child (a lock-null resource).
        const LOCKING_COLLECTION = 0x0200;
        /// Can take a byte range of new content in place.
        const PARTIAL_UPDATE = 0x0400;
        /// Stores arbitrary (dead) properties.
        const CUSTOM_PROPS = 0x0800;
        const POSTABLE = 0x1000;
        /// A lock-null placeholder.
        const LOCK_NULL = 0x2000;
    }
}

/// Capabilities a method needs on its target.
pub fn required_caps(method: DavMethod) -> Caps {
    let caps = [
        (DavMethod::GET, Caps::GETTABLE),
        (DavMethod::HEAD, Caps::GETTABLE),
        (DavMethod::PUT, Caps::REPLACEABLE),
        (DavMethod::PATCH, Caps::PARTIAL_UPDATE),
        (DavMethod::POST, Caps::POSTABLE),
        (DavMethod::PROPFIND, Caps::PROPFINDABLE),
        (DavMethod::PROPPATCH, Caps::PROPFINDABLE),
        (DavMethod::MOVE, Caps::MOVABLE),
        (DavMethod::DELETE, Caps::DELETABLE),
        (DavMethod::LOCK, Caps::LOCKABLE),
        (DavMethod::UNLOCK, Caps::LOCKABLE),
        (DavMethod::MKCOL, Caps::MAKE_COLLECTION),
    ];
    caps.iter()
        .find(|(m, _)| *m == method)
        .map(|(_, c)| *c)
        .unwrap_or_else(Caps::empty)
}

/// Inclusive byte range from a Content-Range: header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub finish: u64,
}

impl ByteRange {
    /// Number of bytes covered, `None` for an inverted range.
    pub fn len(&self) -> Option<u64> {
        self.finish.checked_sub(self.start)?.checked_add(1)
    }

    /// Write `new` over `current` at `start`, growing it as needed.
    ///
    /// The range may extend the content but must not leave a hole: a
    /// start past the current end is 416.
    pub fn splice(&self, current: &[u8], new: &[u8]) -> DavResult<Vec<u8>> {
        if self.len() != Some(new.len() as u64) {
            return Err(DavError::BadRequest(
                "Content-Range does not match the body".to_string(),
            ));
        }
        let start = match usize::try_from(self.start) {
            Ok(s) if s <= current.len() => s,
            _ => return Err(DavError::Status(http::StatusCode::RANGE_NOT_SATISFIABLE)),
        };
        let end = start
            .checked_add(new.len())
            .ok_or(DavError::Status(http::StatusCode::RANGE_NOT_SATISFIABLE))?;
        let mut buf = current.to_vec();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(new);
        Ok(buf)
    }
}

pub(crate) fn not_allowed<'a, T: Send + 'a>() -> DavFuture<'a, T> {
    future::ready(Err(DavError::MethodNotAllowed)).boxed()
}

/// A resource.
///
/// Only `name` and `caps` are mandatory. Everything else has a default
/// that either means "not present" or refuses the operation.
pub trait DavResource: Debug + Send + Sync {
    fn name(&self) -> String;

    fn caps(&self) -> Caps;

    /// Stable identity, the lock table key.
    fn unique_id(&self) -> Option<String> {
        None
    }

    /// A resource can refuse methods it otherwise has the capability for.
    fn is_compatible(&self, _method: DavMethod) -> bool {
        true
    }

    //
    // security.
    //

    fn realm(&self) -> String {
        "dav".to_string()
    }

    fn authenticate_basic(&self, _user: &str, _password: &str) -> Option<AuthTag> {
        None
    }

    fn authenticate_digest(&self, _digest: &DigestResponse) -> DavResult<Option<AuthTag>> {
        Ok(None)
    }

    fn is_digest_allowed(&self) -> bool {
        true
    }

    /// May this identity run this method here.
    fn authorise(&self, _req: &DavRequest, _method: DavMethod, _auth: Option<&Auth>) -> bool {
        true
    }

    /// Where to send the client instead, if anywhere.
    fn check_redirect(&self, _req: &DavRequest) -> Option<String> {
        None
    }

    //
    // metadata.
    //

    fn created(&self) -> Option<SystemTime> {
        None
    }

    fn modified(&self) -> Option<SystemTime> {
        None
    }

    fn content_length(&self) -> Option<u64> {
        None
    }

    fn content_type(&self) -> Option<String> {
        None
    }

    fn etag(&self) -> Option<String> {
        None
    }

    //
    // content.
    //

    fn get_content(&self) -> DavFuture<'_, Bytes> {
        not_allowed()
    }

    fn replace_content(&self, _data: Bytes) -> DavFuture<'_, ()> {
        not_allowed()
    }

    fn replace_partial_content(&self, _range: ByteRange, _data: Bytes) -> DavFuture<'_, ()> {
        not_allowed()
    }

    //
    // collections.
    //

    fn child<'a>(&'a self, _name: &'a str) -> DavFuture<'a, Option<Box<dyn DavResource>>> {
        future::ready(Ok(None)).boxed()
    }

    fn children(&self) -> DavFuture<'_, Vec<Box<dyn DavResource>>> {
        future::ready(Ok(Vec::new())).boxed()
    }

    fn create_new<'a>(
        &'a self,
        _name: &'a str,
        _data: Bytes,
        _content_type: Option<String>,
    ) -> DavFuture<'a, Box<dyn DavResource>> {
        not_allowed()
    }

    fn create_collection<'a>(&'a self, _name: &'a str) -> DavFuture<'a, Box<dyn DavResource>> {
        not_allowed()
    }

    /// Create a locked, empty child in one step. `None` is a broken
    /// implementation.
    fn create_and_lock<'a>(
        &'a self,
        _name: &'a str,
        _timeout: LockTimeout,
        _info: LockInfo,
    ) -> DavFuture<'a, Option<LockToken>> {
        not_allowed()
    }

    //
    // moving and deleting.
    //

    fn move_to<'a>(&'a self, _dest: &'a dyn DavResource, _name: &'a str) -> DavFuture<'a, ()> {
        not_allowed()
    }

    fn delete(&self) -> DavFuture<'_, ()> {
        not_allowed()
    }

    //
    // locking.
    //

    fn lock(&self, _timeout: LockTimeout, _info: LockInfo) -> DavResult<LockResult> {
        Err(DavError::MethodNotAllowed)
    }

    fn refresh_lock(&self, _token_id: &str) -> DavResult<LockResult> {
        Err(DavError::MethodNotAllowed)
    }

    fn unlock(&self, _token_id: &str) -> DavResult<()> {
        Err(DavError::MethodNotAllowed)
    }

    fn current_lock(&self) -> Option<LockToken> {
        None
    }

    //
    // dead properties.
    //

    fn dead_props(&self) -> Vec<(PropName, Element)> {
        Vec::new()
    }

    /// Set (`Some`) or remove (`None`) a dead property.
    fn set_dead_prop(&self, _name: &PropName, _value: Option<Element>) -> DavResult<()> {
        Err(DavError::MethodNotAllowed)
    }

    //
    // forms.
    //

    /// Handle a form post. Returns where to redirect to, if anywhere.
    fn process_form<'a>(
        &'a self,
        _params: Vec<(String, String)>,
    ) -> DavFuture<'a, Option<String>> {
        not_allowed()
    }
}

/// Maps request paths to resources.
pub trait ResourceFactory: Send + Sync {
    /// Resolve a decoded path like `/a/b.txt`. `None` if nothing is there.
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        path: &'a str,
    ) -> DavFuture<'a, Option<Box<dyn DavResource>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_capabilities() {
        assert_eq!(required_caps(DavMethod::GET), Caps::GETTABLE);
        assert_eq!(required_caps(DavMethod::PROPPATCH), Caps::PROPFINDABLE);
        assert_eq!(required_caps(DavMethod::OPTIONS), Caps::empty());
    }

    #[test]
    fn splice_ranges() {
        let r = ByteRange { start: 1, finish: 2 };
        assert_eq!(r.splice(b"abcd", b"XY").unwrap(), b"aXYd");
        let r = ByteRange { start: 3, finish: 5 };
        assert_eq!(r.splice(b"abcd", b"XYZ").unwrap(), b"abcXYZ");
        let r = ByteRange { start: 4, finish: 4 };
        assert_eq!(r.splice(b"abcd", b"e").unwrap(), b"abcde");

        let past_end = ByteRange { start: 5, finish: 5 };
        assert!(matches!(
            past_end.splice(b"abcd", b"e"),
            Err(DavError::Status(http::StatusCode::RANGE_NOT_SATISFIABLE))
        ));
        let huge = ByteRange { start: u64::MAX - 1, finish: u64::MAX - 1 };
        assert!(matches!(
            huge.splice(b"abc", b"x"),
            Err(DavError::Status(http::StatusCode::RANGE_NOT_SATISFIABLE))
        ));
        let whole = ByteRange { start: 0, finish: u64::MAX };
        assert_eq!(whole.len(), None);
        assert!(matches!(whole.splice(b"abc", b"x"), Err(DavError::BadRequest(_))));
        let short = ByteRange { start: 0, finish: 3 };
        assert!(matches!(short.splice(b"abc", b"x"), Err(DavError::BadRequest(_))));
    }

    #[derive(Debug)]
    struct Bare;

    impl DavResource for Bare {
        fn name(&self) -> String {
            "bare".to_string()
        }
        fn caps(&self) -> Caps {
            Caps::empty()
        }
    }

    #[tokio::test]
    async fn defaults_refuse() {
        let r = Bare;
        assert!(matches!(r.get_content().await, Err(DavError::MethodNotAllowed)));
        assert!(matches!(r.delete().await, Err(DavError::MethodNotAllowed)));
        assert!(r.children().await.unwrap().is_empty());
        assert!(r.current_lock().is_none());
        let req = crate::auth::tests::request(None);
        assert!(r.authorise(&req, DavMethod::PUT, None));
    }
}
