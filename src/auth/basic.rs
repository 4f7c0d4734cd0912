use super::{AuthScheme, AuthTag, AuthenticationHandler};
use crate::context::DavRequest;
use crate::resource::DavResource;
use crate::DavResult;

/// Basic authentication. The resource checks the password.
#[derive(Debug, Default, Clone)]
pub struct BasicAuthHandler;

impl BasicAuthHandler {
    pub fn new() -> BasicAuthHandler {
        BasicAuthHandler
    }
}

impl AuthenticationHandler for BasicAuthHandler {
    fn supports(&self, _res: &dyn DavResource, req: &DavRequest) -> bool {
        req.auth()
            .map(|a| a.scheme == AuthScheme::Basic)
            .unwrap_or(false)
    }

    fn authenticate(&self, res: &dyn DavResource, req: &DavRequest) -> DavResult<Option<AuthTag>> {
        let auth = match req.auth() {
            Some(a) => a,
            None => return Ok(None),
        };
        let user = auth.user.as_deref().unwrap_or_default();
        let password = auth.password.as_deref().unwrap_or_default();
        let tag = res.authenticate_basic(user, password);
        if tag.is_none() {
            debug!("basic: rejected credentials for {}", user);
        }
        Ok(tag)
    }

    fn challenge(&self, res: &dyn DavResource, _req: &DavRequest) -> Option<String> {
        Some(format!("Basic realm=\"{}\"", res.realm()))
    }

    fn is_compatible(&self, _res: &dyn DavResource) -> bool {
        true
    }
}
