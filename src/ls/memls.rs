//! Simple in-memory lock manager.
//!
//! Locks are indexed both by resource identity and by token id.
//! Expired locks are removed lazily, when a lookup trips over them.
//!
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{DavLockManager, LockFailure, LockInfo, LockResult, LockTimeout, LockToken};
use crate::errors::DavError;
use crate::DavResult;

/// Ephemeral in-memory lock table.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<Mutex<MemLsInner>>);

#[derive(Debug, Default)]
struct MemLsInner {
    by_resource: HashMap<String, LockToken>,
    by_token: HashMap<String, String>,
}

impl MemLs {
    /// Create a new "memls" lock manager.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs(Arc::new(Mutex::new(MemLsInner::default()))))
    }
}

impl MemLsInner {
    fn current(&mut self, resource_id: &str, now: SystemTime) -> Option<&LockToken> {
        let expired = match self.by_resource.get(resource_id) {
            Some(t) => t.is_expired_at(now),
            None => return None,
        };
        if expired {
            if let Some(t) = self.by_resource.remove(resource_id) {
                trace!("lock {} on {} expired", t.token_id, resource_id);
                self.by_token.remove(&t.token_id);
            }
            return None;
        }
        self.by_resource.get(resource_id)
    }

    fn remove(&mut self, resource_id: &str) {
        if let Some(t) = self.by_resource.remove(resource_id) {
            self.by_token.remove(&t.token_id);
        }
    }
}

impl DavLockManager for MemLs {
    fn lock(&self, timeout: LockTimeout, info: LockInfo, resource_id: &str) -> LockResult {
        let mut inner = self.0.lock();
        let now = SystemTime::now();
        if let Some(t) = inner.current(resource_id, now) {
            debug!("{} already locked by token {}", resource_id, t.token_id);
            return Err(LockFailure::AlreadyLocked);
        }
        let token = LockToken {
            token_id: Uuid::new_v4().to_string(),
            info,
            timeout,
            issued_at: now,
        };
        inner
            .by_token
            .insert(token.token_id.clone(), resource_id.to_string());
        inner
            .by_resource
            .insert(resource_id.to_string(), token.clone());
        debug!("locked {} with token {}", resource_id, token.token_id);
        Ok(token)
    }

    fn refresh(&self, token_id: &str) -> LockResult {
        let mut inner = self.0.lock();
        let resource_id = match inner.by_token.get(token_id) {
            Some(r) => r.clone(),
            None => {
                debug!("refresh: no lock with token {}", token_id);
                return Err(LockFailure::PreconditionFailed);
            }
        };
        let now = SystemTime::now();
        if inner.current(&resource_id, now).is_none() {
            return Err(LockFailure::PreconditionFailed);
        }
        match inner.by_resource.get_mut(&resource_id) {
            Some(t) => {
                t.issued_at = now;
                Ok(t.clone())
            }
            None => Err(LockFailure::PreconditionFailed),
        }
    }

    fn unlock(&self, token_id: &str, resource_id: &str) -> DavResult<()> {
        let mut inner = self.0.lock();
        let current = match inner.current(resource_id, SystemTime::now()) {
            Some(t) => t.token_id.clone(),
            None => {
                trace!("unlock: {} is not locked", resource_id);
                return Ok(());
            }
        };
        if current == token_id {
            inner.remove(resource_id);
            debug!("unlocked {}", resource_id);
            Ok(())
        } else {
            debug!("unlock: token {} does not match lock on {}", token_id, resource_id);
            Err(DavError::NotAuthorized(Vec::new()))
        }
    }

    fn current_lock(&self, resource_id: &str) -> Option<LockToken> {
        let mut inner = self.0.lock();
        inner.current(resource_id, SystemTime::now()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ls::{LockDepth, LockScope, LockType};
    use std::time::Duration;

    fn info(user: &str) -> LockInfo {
        LockInfo {
            scope: LockScope::Exclusive,
            lock_type: LockType::Write,
            depth: LockDepth::Infinity,
            owner: None,
            locked_by_user: Some(user.to_string()),
        }
    }

    #[test]
    fn second_lock_is_refused() {
        let ls = MemLs::new();
        let t = ls.lock(LockTimeout::Infinite, info("a"), "r1").unwrap();
        assert_eq!(
            ls.lock(LockTimeout::Infinite, info("b"), "r1"),
            Err(LockFailure::AlreadyLocked)
        );
        assert_eq!(ls.current_lock("r1").unwrap().token_id, t.token_id);
        // other resources are unaffected.
        assert!(ls.lock(LockTimeout::Infinite, info("b"), "r2").is_ok());
    }

    #[test]
    fn lock_unlock_round_trip() {
        let ls = MemLs::new();
        let t = ls.lock(LockTimeout::Seconds(60), info("a"), "r").unwrap();
        assert!(matches!(
            ls.unlock("not-the-token", "r"),
            Err(DavError::NotAuthorized(_))
        ));
        assert!(ls.current_lock("r").is_some());
        ls.unlock(&t.token_id, "r").unwrap();
        assert!(ls.current_lock("r").is_none());
        // unlocking again is a no-op.
        ls.unlock(&t.token_id, "r").unwrap();
        assert!(ls.lock(LockTimeout::Seconds(60), info("b"), "r").is_ok());
    }

    #[test]
    fn expired_lock_is_dropped_on_lookup() {
        let ls = MemLs::new();
        let t = ls.lock(LockTimeout::Seconds(0), info("a"), "r").unwrap();
        assert!(ls.current_lock("r").is_none());
        assert_eq!(ls.refresh(&t.token_id), Err(LockFailure::PreconditionFailed));
        assert!(ls.0.lock().by_token.is_empty());
        assert!(ls.lock(LockTimeout::Infinite, info("b"), "r").is_ok());
    }

    #[test]
    fn refresh_restarts_lease() {
        let ls = MemLs::new();
        let t = ls.lock(LockTimeout::Seconds(3600), info("a"), "r").unwrap();
        {
            let mut inner = ls.0.lock();
            let old = inner.by_resource.get_mut("r").unwrap();
            old.issued_at -= Duration::from_secs(1800);
        }
        let r = ls.refresh(&t.token_id).unwrap();
        assert!(r.issued_at > t.issued_at - Duration::from_secs(1));
        assert_eq!(ls.refresh("unknown"), Err(LockFailure::PreconditionFailed));
    }
}
