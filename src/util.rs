use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use headers::Header;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const PATCH = 0x0008;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;
        const POST = 0x2000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        /// Methods that may carry a request body.
        const WITH_BODY = Self::PUT.bits() | Self::PATCH.bits() | Self::POST.bits()
            | Self::PROPFIND.bits() | Self::PROPPATCH.bits() | Self::LOCK.bits();
    }
}
impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();

    /// Methods that change state on the server.
    pub fn is_write(&self) -> bool {
        self.intersects(
            DavMethod::PUT
                | DavMethod::PATCH
                | DavMethod::POST
                | DavMethod::DELETE
                | DavMethod::MKCOL
                | DavMethod::MOVE
                | DavMethod::PROPPATCH
                | DavMethod::LOCK
                | DavMethod::UNLOCK,
        )
    }

    /// Write methods that must not run against a resource somebody
    /// else holds a lock on. Form posts are exempt, LOCK and UNLOCK
    /// do their own checking.
    pub fn needs_lock_check(&self) -> bool {
        self.is_write() && !self.intersects(DavMethod::POST | DavMethod::LOCK | DavMethod::UNLOCK)
    }

    /// Canonical method name.
    pub fn name(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(m, _)| m == self)
            .map(|(_, n)| *n)
            .unwrap_or("UNKNOWN")
    }
}

/// A set of methods, as used by [`DavBuilder::methods`](crate::DavBuilder::methods).
pub type DavMethodSet = DavMethod;

const METHODS: [(DavMethod, &str); 13] = [
    (DavMethod::HEAD, "HEAD"),
    (DavMethod::GET, "GET"),
    (DavMethod::PUT, "PUT"),
    (DavMethod::PATCH, "PATCH"),
    (DavMethod::POST, "POST"),
    (DavMethod::OPTIONS, "OPTIONS"),
    (DavMethod::PROPFIND, "PROPFIND"),
    (DavMethod::PROPPATCH, "PROPPATCH"),
    (DavMethod::MKCOL, "MKCOL"),
    (DavMethod::MOVE, "MOVE"),
    (DavMethod::DELETE, "DELETE"),
    (DavMethod::LOCK, "LOCK"),
    (DavMethod::UNLOCK, "UNLOCK"),
];

/// Map a request method onto a DavMethod. Method names are case
/// sensitive, anything not in the table (COPY included) is refused.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    METHODS
        .iter()
        .find(|(_, n)| *n == m.as_str())
        .map(|(dm, _)| *dm)
        .ok_or(DavError::UnknownDavMethod)
}

fn offsetdatetime(t: SystemTime) -> OffsetDateTime {
    let secs = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    };
    OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// `Sun, 06 Nov 1994 08:49:37 GMT`, as used in getlastmodified.
pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let mut values: Vec<http::HeaderValue> = Vec::with_capacity(1);
    headers::Date::from(t).encode(&mut values);
    match values.first().map(|v| v.to_str()) {
        Some(Ok(s)) => s.to_string(),
        _ => String::new(),
    }
}

/// `1996-12-19T16:39:57Z`, as used in creationdate.
pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    offsetdatetime(t).format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn date_formats() {
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(systemtime_to_httpdate(t), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(systemtime_to_rfc3339(t), "1994-11-06T08:49:37Z");
        assert_eq!(systemtime_to_rfc3339(UNIX_EPOCH), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn write_methods() {
        assert!(DavMethod::PUT.needs_lock_check());
        assert!(DavMethod::MOVE.needs_lock_check());
        assert!(!DavMethod::POST.needs_lock_check());
        assert!(DavMethod::POST.is_write());
        assert!(!DavMethod::LOCK.needs_lock_check());
        assert!(!DavMethod::PROPFIND.is_write());
    }

    #[test]
    fn method_lookup() {
        let m = http::Method::from_bytes(b"PROPPATCH").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::PROPPATCH);
        let m = http::Method::from_bytes(b"BREW").unwrap();
        assert!(dav_method(&m).is_err());
        assert_eq!(DavMethod::MKCOL.name(), "MKCOL");
    }
}
