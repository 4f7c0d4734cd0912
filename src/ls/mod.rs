//! Write locks.
//!
//! Note that the lock manager methods are synchronous. The lock table
//! lives in memory and none of its operations do I/O, so there is no
//! point in returning futures.
//!
use std::fmt::{self, Debug};
use std::time::{Duration, SystemTime};

use headers::HeaderMapExt;
use http::StatusCode;
use xmltree::Element;

use crate::context::DavRequest;
use crate::davheaders;
use crate::errors::DavError;
use crate::resource::{Caps, DavResource};
use crate::xmltree_ext::ElementExt;
use crate::DavResult;

pub mod memls;

pub use memls::MemLs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

/// What a client asked for in a LOCK body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub scope: LockScope,
    pub lock_type: LockType,
    pub depth: LockDepth,
    /// Free form owner description from the `<D:owner>` element.
    pub owner: Option<String>,
    /// Identity holding the lock: the authenticated user if there is one,
    /// else the owner description.
    pub locked_by_user: Option<String>,
}

impl LockInfo {
    /// Parse a `<D:lockinfo>` element.
    pub fn from_xml(elem: &Element, depth: LockDepth, user: Option<&str>) -> DavResult<LockInfo> {
        if !elem.is_dav("lockinfo") {
            return Err(DavError::BadRequest("expected lockinfo".to_string()));
        }
        let mut scope = LockScope::Exclusive;
        let mut owner = None;
        for child in elem.child_elems() {
            if child.is_dav("lockscope") {
                if child.dav_child("shared").is_some() {
                    scope = LockScope::Shared;
                }
            } else if child.is_dav("locktype") {
                if child.dav_child("write").is_none() {
                    return Err(DavError::BadRequest("only write locks".to_string()));
                }
            } else if child.is_dav("owner") {
                let text = child.text_content().trim().to_string();
                if !text.is_empty() {
                    owner = Some(text);
                }
            }
        }
        let locked_by_user = user.map(|u| u.to_string()).or_else(|| owner.clone());
        Ok(LockInfo {
            scope,
            lock_type: LockType::Write,
            depth,
            owner,
            locked_by_user,
        })
    }
}

/// Requested or granted lock duration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    Seconds(u32),
    #[default]
    Infinite,
}

impl LockTimeout {
    /// Parse one `Second-N` or `Infinite` word. N is capped at 2^32-1.
    pub fn parse(word: &str) -> Option<LockTimeout> {
        if word.eq_ignore_ascii_case("infinite") {
            return Some(LockTimeout::Infinite);
        }
        let n = word.strip_prefix("Second-")?;
        let secs = n.parse::<u64>().ok()?;
        Some(LockTimeout::Seconds(secs.min(u32::MAX as u64) as u32))
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            LockTimeout::Seconds(s) => Some(Duration::from_secs(*s as u64)),
            LockTimeout::Infinite => None,
        }
    }
}

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockTimeout::Seconds(s) => write!(f, "Second-{s}"),
            LockTimeout::Infinite => write!(f, "Infinite"),
        }
    }
}

/// An active lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub token_id: String,
    pub info: LockInfo,
    pub timeout: LockTimeout,
    pub issued_at: SystemTime,
}

impl LockToken {
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.timeout.as_duration() {
            Some(d) => self.issued_at + d <= now,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    AlreadyLocked,
    PreconditionFailed,
}

impl LockFailure {
    pub fn status(&self) -> StatusCode {
        match self {
            LockFailure::AlreadyLocked => StatusCode::LOCKED,
            LockFailure::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        }
    }
}

impl From<LockFailure> for DavError {
    fn from(f: LockFailure) -> Self {
        match f {
            LockFailure::AlreadyLocked => DavError::Locked,
            LockFailure::PreconditionFailed => DavError::PreconditionFailed,
        }
    }
}

pub type LockResult = Result<LockToken, LockFailure>;

/// The lock table. At most one lock per resource identity.
pub trait DavLockManager: Debug + Send + Sync {
    /// Lock a resource. Fails with `AlreadyLocked` if a live lock exists.
    fn lock(&self, timeout: LockTimeout, info: LockInfo, resource_id: &str) -> LockResult;

    /// Restart the lease of an existing lock.
    fn refresh(&self, token_id: &str) -> LockResult;

    /// Release a lock. Unlocking an unlocked resource is a no-op,
    /// presenting the wrong token is `NotAuthorized`.
    fn unlock(&self, token_id: &str, resource_id: &str) -> DavResult<()>;

    /// The live lock on a resource, if any.
    fn current_lock(&self, resource_id: &str) -> Option<LockToken>;
}

/// Is `res` write-locked by somebody other than the requester, without
/// the request citing the token in its `If` header.
pub fn is_locked_out(req: &DavRequest, res: &dyn DavResource) -> bool {
    if !res.caps().contains(Caps::LOCKABLE) {
        return false;
    }
    let token = match res.current_lock() {
        Some(t) => t,
        None => return false,
    };
    let lock_user = match token.info.locked_by_user.as_deref() {
        Some(u) => u,
        None => {
            warn!(
                "resource {} is locked with a null user, ignoring the lock",
                res.name()
            );
            return false;
        }
    };
    if req.user() == Some(lock_user) {
        return false;
    }
    let cited = req
        .headers()
        .typed_get::<davheaders::If>()
        .map(|h| h.cites(&token.token_id))
        .unwrap_or(false);
    if cited {
        trace!("lock token {} cited in If header", token.token_id);
        false
    } else {
        debug!(
            "resource {} locked by {}, requested by {:?}",
            res.name(),
            lock_user,
            req.user()
        );
        true
    }
}

/// Did the client say it does not need a lock (`If: (<DAV:no-lock>)`).
pub fn missing_lock(req: &DavRequest) -> bool {
    req.headers()
        .typed_get::<davheaders::If>()
        .map(|h| h.is_no_lock())
        .unwrap_or(false)
}
