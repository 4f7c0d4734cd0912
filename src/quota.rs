//! Storage capacity checks before content is written.
//!
//! Checkers are consulted in order, the first one that objects wins.
use crate::context::DavRequest;
use crate::resource::DavResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorReason {
    QuotaExceeded,
    DiskFull,
}

pub trait StorageChecker: Send + Sync {
    /// Adding a new resource below `parent` (the nearest existing
    /// collection, if one was found) at `parent_path`.
    fn check_on_add(
        &self,
        req: &DavRequest,
        parent: Option<&dyn DavResource>,
        parent_path: &str,
        host: &str,
    ) -> Option<StorageErrorReason>;

    /// Replacing the content of `replaced`.
    fn check_on_replace(
        &self,
        req: &DavRequest,
        parent: Option<&dyn DavResource>,
        replaced: &dyn DavResource,
        host: &str,
    ) -> Option<StorageErrorReason>;
}

pub(crate) fn check_on_add(
    checkers: &[std::sync::Arc<dyn StorageChecker>],
    req: &DavRequest,
    parent: Option<&dyn DavResource>,
    parent_path: &str,
) -> Option<StorageErrorReason> {
    checkers
        .iter()
        .find_map(|c| c.check_on_add(req, parent, parent_path, req.host()))
}

pub(crate) fn check_on_replace(
    checkers: &[std::sync::Arc<dyn StorageChecker>],
    req: &DavRequest,
    parent: Option<&dyn DavResource>,
    replaced: &dyn DavResource,
) -> Option<StorageErrorReason> {
    checkers
        .iter()
        .find_map(|c| c.check_on_replace(req, parent, replaced, req.host()))
}
