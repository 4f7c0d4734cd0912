use std::collections::HashMap;
use std::sync::Arc;

use super::digest::{generate_digest, DigestResponse};
use super::{Auth, AuthTag};
use crate::context::DavRequest;
use crate::resource::DavResource;
use crate::util::DavMethod;
use crate::DavResult;

/// Checks passwords and decides who may do what. Resources usually
/// delegate their authentication hooks to one of these.
pub trait SecurityManager: Send + Sync {
    fn authenticate_basic(&self, user: &str, password: &str) -> Option<AuthTag>;

    fn authenticate_digest(&self, digest: &DigestResponse) -> DavResult<Option<AuthTag>>;

    fn authorise(
        &self,
        req: &DavRequest,
        method: DavMethod,
        auth: Option<&Auth>,
        res: &dyn DavResource,
    ) -> bool;

    fn realm(&self, host: &str) -> String;

    fn is_digest_allowed(&self) -> bool {
        true
    }
}

/// A fixed realm and a fixed set of users. Any authenticated user may do
/// anything, anonymous users nothing.
#[derive(Debug, Clone)]
pub struct SimpleSecurityManager {
    realm: String,
    users: Arc<HashMap<String, String>>,
}

impl SimpleSecurityManager {
    pub fn new(realm: impl Into<String>, users: HashMap<String, String>) -> SimpleSecurityManager {
        SimpleSecurityManager {
            realm: realm.into(),
            users: Arc::new(users),
        }
    }
}

impl SecurityManager for SimpleSecurityManager {
    fn authenticate_basic(&self, user: &str, password: &str) -> Option<AuthTag> {
        // some clients send user@domain
        let user = user.split('@').next().unwrap_or(user);
        match self.users.get(user) {
            Some(p) if p == password => Some(Arc::new(user.to_string())),
            _ => None,
        }
    }

    fn authenticate_digest(&self, digest: &DigestResponse) -> DavResult<Option<AuthTag>> {
        let password = match self.users.get(&digest.user) {
            Some(p) => p,
            None => return Ok(None),
        };
        if generate_digest(digest, password)? == digest.response {
            Ok(Some(Arc::new(digest.user.clone())))
        } else {
            debug!("digest mismatch for {}", digest.user);
            Ok(None)
        }
    }

    fn authorise(
        &self,
        _req: &DavRequest,
        _method: DavMethod,
        auth: Option<&Auth>,
        _res: &dyn DavResource,
    ) -> bool {
        auth.map(|a| a.is_tagged()).unwrap_or(false)
    }

    fn realm(&self, _host: &str) -> String {
        self.realm.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sm() -> SimpleSecurityManager {
        let mut users = HashMap::new();
        users.insert("Mufasa".to_string(), "Circle Of Life".to_string());
        SimpleSecurityManager::new("testrealm@host.com", users)
    }

    #[test]
    fn basic_strips_domain() {
        assert!(sm().authenticate_basic("Mufasa@savanna", "Circle Of Life").is_some());
        assert!(sm().authenticate_basic("Mufasa", "circle of life").is_none());
        assert!(sm().authenticate_basic("Scar", "x").is_none());
    }

    #[test]
    fn digest_verification() {
        let dr = DigestResponse::parse(
            r#"username="Mufasa", realm="testrealm@host.com",
            nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", uri="/dir/index.html",
            qop=auth, nc=00000001, cnonce="0a4f113b",
            response="6629fae49393a05397450978507c4ef1""#,
            "GET",
        )
        .unwrap();
        assert!(sm().authenticate_digest(&dr).unwrap().is_some());
        let wrong = DigestResponse {
            response: "00".to_string(),
            ..dr
        };
        assert!(sm().authenticate_digest(&wrong).unwrap().is_none());
    }
}
