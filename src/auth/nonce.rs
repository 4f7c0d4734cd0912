//! Digest nonces.
//!
//! [`MemNonceProvider`] keeps issued nonces in a concurrent map. Lookups
//! check expiry themselves; a separate [`NonceReaper`] task sweeps out old
//! entries so the table does not grow without bound.
//!
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::context::DavRequest;

/// Default nonce lifetime.
pub const DEFAULT_NONCE_VALIDITY: Duration = Duration::from_secs(60 * 60 * 24);

/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceValidity {
    Ok,
    Expired,
    Invalid,
}

/// Issues and validates Digest nonces.
pub trait NonceProvider: Send + Sync {
    fn create_nonce(&self, req: &DavRequest) -> String;

    /// Validity of a nonce the client sent back, with its nonce count
    /// if it sent one.
    fn nonce_validity(&self, nonce: &str, nc: Option<u64>) -> NonceValidity;
}

#[derive(Debug, Clone)]
struct Nonce {
    issued: SystemTime,
    count: u64,
}

/// In-memory nonce table.
#[derive(Debug, Clone)]
pub struct MemNonceProvider {
    nonces: Arc<DashMap<Uuid, Nonce>>,
    validity: Duration,
    check_nonce_count: bool,
}

impl Default for MemNonceProvider {
    fn default() -> Self {
        MemNonceProvider::new(DEFAULT_NONCE_VALIDITY)
    }
}

impl MemNonceProvider {
    pub fn new(validity: Duration) -> MemNonceProvider {
        MemNonceProvider {
            nonces: Arc::new(DashMap::new()),
            validity,
            check_nonce_count: false,
        }
    }

    /// Reject nonce counts that do not increase. Off by default, clients
    /// do send them out of order.
    pub fn nonce_count_checking(self, check: bool) -> Self {
        let mut this = self;
        this.check_nonce_count = check;
        this
    }

    /// Issue a nonce as of `now`.
    pub fn issue(&self, now: SystemTime) -> String {
        let id = Uuid::new_v4();
        self.nonces.insert(id, Nonce { issued: now, count: 0 });
        id.to_string()
    }

    fn expired(&self, issued: SystemTime, now: SystemTime) -> bool {
        match now.duration_since(issued) {
            Ok(age) => age >= self.validity,
            Err(_) => false,
        }
    }

    /// Validity of `nonce` as of `now`.
    pub fn validity_at(&self, nonce: &str, nc: Option<u64>, now: SystemTime) -> NonceValidity {
        let id = match Uuid::parse_str(nonce) {
            Ok(id) => id,
            Err(_) => {
                trace!("nonce {} is not a uuid", nonce);
                return NonceValidity::Invalid;
            }
        };
        let mut entry = match self.nonces.get_mut(&id) {
            Some(e) => e,
            None => return NonceValidity::Invalid,
        };
        if self.expired(entry.issued, now) {
            return NonceValidity::Expired;
        }
        if let Some(nc) = nc {
            if self.check_nonce_count && nc <= entry.count {
                debug!("nonce {} replayed with count {} <= {}", nonce, nc, entry.count);
                return NonceValidity::Invalid;
            }
            entry.count = entry.count.max(nc);
        }
        NonceValidity::Ok
    }

    /// Drop every nonce that has expired as of `now`. Returns how many.
    pub fn remove_expired(&self, now: SystemTime) -> usize {
        let before = self.nonces.len();
        self.nonces.retain(|_, n| !self.expired(n.issued, now));
        before.saturating_sub(self.nonces.len())
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    /// Start the background sweep. It runs until the returned handle
    /// is dropped or stopped.
    pub fn spawn_reaper(&self, period: Duration) -> NonceReaper {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let n = this.remove_expired(SystemTime::now());
                if n > 0 {
                    debug!("nonce reaper: removed {} expired nonces", n);
                }
            }
        });
        NonceReaper { handle }
    }
}

impl NonceProvider for MemNonceProvider {
    fn create_nonce(&self, _req: &DavRequest) -> String {
        self.issue(SystemTime::now())
    }

    fn nonce_validity(&self, nonce: &str, nc: Option<u64>) -> NonceValidity {
        self.validity_at(nonce, nc, SystemTime::now())
    }
}

/// Handle to the expiry sweep task.
#[derive(Debug)]
pub struct NonceReaper {
    handle: JoinHandle<()>,
}

impl NonceReaper {
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for NonceReaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_garbage_are_invalid() {
        let p = MemNonceProvider::default();
        assert_eq!(p.nonce_validity("garbage", None), NonceValidity::Invalid);
        let other = Uuid::new_v4().to_string();
        assert_eq!(p.nonce_validity(&other, None), NonceValidity::Invalid);
    }

    #[test]
    fn expiry_boundary() {
        for secs in [1u64, 30, 86400] {
            let validity = Duration::from_secs(secs);
            let p = MemNonceProvider::new(validity);
            let t = SystemTime::now();
            let n = p.issue(t);
            assert_eq!(p.validity_at(&n, None, t), NonceValidity::Ok);
            assert_eq!(
                p.validity_at(&n, None, t + validity - Duration::from_millis(1)),
                NonceValidity::Ok
            );
            assert_eq!(p.validity_at(&n, None, t + validity), NonceValidity::Expired);
            assert_eq!(
                p.validity_at(&n, None, t + validity * 2),
                NonceValidity::Expired
            );
        }
    }

    #[test]
    fn nonce_count_is_ignored_by_default() {
        let p = MemNonceProvider::default();
        let n = p.issue(SystemTime::now());
        assert_eq!(p.nonce_validity(&n, Some(2)), NonceValidity::Ok);
        assert_eq!(p.nonce_validity(&n, Some(1)), NonceValidity::Ok);
        assert_eq!(p.nonce_validity(&n, Some(2)), NonceValidity::Ok);
    }

    #[test]
    fn nonce_count_replay_when_checking() {
        let p = MemNonceProvider::default().nonce_count_checking(true);
        let n = p.issue(SystemTime::now());
        assert_eq!(p.nonce_validity(&n, Some(1)), NonceValidity::Ok);
        assert_eq!(p.nonce_validity(&n, Some(1)), NonceValidity::Invalid);
        assert_eq!(p.nonce_validity(&n, Some(3)), NonceValidity::Ok);
        assert_eq!(p.nonce_validity(&n, Some(2)), NonceValidity::Invalid);
        // no count at all is fine.
        assert_eq!(p.nonce_validity(&n, None), NonceValidity::Ok);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let p = MemNonceProvider::new(Duration::from_secs(10));
        let t = SystemTime::now();
        let old = p.issue(t - Duration::from_secs(20));
        let fresh = p.issue(t);
        assert_eq!(p.remove_expired(t), 1);
        assert_eq!(p.len(), 1);
        assert_eq!(p.validity_at(&old, None, t), NonceValidity::Invalid);
        assert_eq!(p.validity_at(&fresh, None, t), NonceValidity::Ok);
    }

    #[tokio::test]
    async fn reaper_sweeps_in_background() {
        let p = MemNonceProvider::new(Duration::from_millis(10));
        p.issue(SystemTime::now());
        let reaper = p.spawn_reaper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(p.is_empty());
        reaper.stop();
    }
}
