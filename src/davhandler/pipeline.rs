//
// The checks every request goes through before a method handler runs,
// in this order:
//
// 1. the resource must have the capabilities the method needs, and must
//    not veto the method (405).
// 2. authentication and authorisation (401, with all challenges).
// 3. redirect (302).
// 4. for write methods, the resource must not be locked by someone else (423).
//
use crate::context::DavRequest;
use crate::errors::DavError;
use crate::ls::is_locked_out;
use crate::resource::{Caps, DavResource};
use crate::DavResult;

/// Decisions that depend on which client is talking to us.
pub trait UserAgentPolicy: Send + Sync {
    /// May a MOVE replace an existing destination without `Overwrite: T`.
    fn implicit_overwrite(&self, req: &DavRequest) -> bool;
}

/// The macOS Finder never sends `Overwrite: T` but expects MOVE to
/// replace the destination anyway.
#[derive(Debug, Default, Clone)]
pub struct MacFinderPolicy;

impl MacFinderPolicy {
    pub fn is_mac_finder(user_agent: &str) -> bool {
        user_agent.contains("WebDAVFS") && user_agent.contains("Darwin")
    }
}

impl UserAgentPolicy for MacFinderPolicy {
    fn implicit_overwrite(&self, req: &DavRequest) -> bool {
        req.user_agent().map(Self::is_mac_finder).unwrap_or(false)
    }
}

impl crate::DavHandler {
    pub(crate) async fn resolve(
        &self,
        req: &DavRequest,
        path: &str,
    ) -> DavResult<Option<Box<dyn DavResource>>> {
        let res = self.factory.resolve(req.host(), path).await?;
        trace!("resolve {}: {}", path, if res.is_some() { "found" } else { "none" });
        Ok(res)
    }

    /// Steps 1 to 4 against `res`, which needs at least `caps`.
    pub(crate) fn preflight(
        &self,
        req: &mut DavRequest,
        res: &dyn DavResource,
        caps: Caps,
    ) -> DavResult<()> {
        let method = req.method();
        if !res.caps().contains(caps) {
            debug!(
                "{} on {}: missing capabilities {:?}",
                method.name(),
                res.name(),
                caps - res.caps()
            );
            return Err(DavError::MethodNotAllowed);
        }
        if !res.is_compatible(method) {
            debug!("{} on {}: refused by the resource", method.name(), res.name());
            return Err(DavError::MethodNotAllowed);
        }

        self.check_authorisation(req, res)?;

        if let Some(url) = res.check_redirect(req) {
            debug!("{} on {}: redirect to {}", method.name(), res.name(), url);
            return Err(DavError::Redirect(url));
        }

        if method.needs_lock_check() && is_locked_out(req, res) {
            return Err(DavError::Locked);
        }
        Ok(())
    }

    /// Authenticate the request against `res`, then ask `res` whether
    /// that identity may run the method.
    pub(crate) fn check_authorisation(
        &self,
        req: &mut DavRequest,
        res: &dyn DavResource,
    ) -> DavResult<()> {
        if let Some(status) = self.auth.authenticate(res, req)? {
            if status.login_failed {
                return Err(self.unauthorised(req, res));
            }
        }
        if !res.authorise(req, req.method(), req.auth()) {
            debug!(
                "{} on {}: not authorised for {:?}",
                req.method().name(),
                res.name(),
                req.user()
            );
            return Err(self.unauthorised(req, res));
        }
        Ok(())
    }

    pub(crate) fn unauthorised(&self, req: &DavRequest, res: &dyn DavResource) -> DavError {
        DavError::NotAuthorized(self.auth.challenges(res, req))
    }

    /// Handlers raise `NotAuthorized` without challenges, fill them in.
    pub(crate) fn with_challenges(
        &self,
        err: DavError,
        req: &DavRequest,
        res: &dyn DavResource,
    ) -> DavError {
        match err {
            DavError::NotAuthorized(ch) if ch.is_empty() => self.unauthorised(req, res),
            e => e,
        }
    }
}
