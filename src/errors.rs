use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::quota::StorageErrorReason;

pub type DavResult<T> = Result<T, DavError>;

/// Every way a request can fail.
///
/// Each variant maps to exactly one HTTP status (see [`DavError::statuscode`]).
#[derive(Debug)]
pub enum DavError {
    /// No, invalid or insufficient credentials. Carries the
    /// `WWW-Authenticate` challenges to send back.
    NotAuthorized(Vec<String>),
    BadRequest(String),
    Conflict(String),
    NotFound,
    Locked,
    PreconditionFailed,
    InsufficientStorage(StorageErrorReason),
    MethodNotAllowed,
    UnknownDavMethod,
    Redirect(String),
    InvalidPath,
    XmlParseError,
    Status(StatusCode),
    StatusClose(StatusCode),
    IoError(io::Error),
    /// Programming contract violation.
    Internal(String),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::NotAuthorized(_) => write!(f, "not authorized"),
            DavError::BadRequest(m) => write!(f, "bad request: {m}"),
            DavError::Conflict(m) => write!(f, "conflict: {m}"),
            DavError::NotFound => write!(f, "not found"),
            DavError::Locked => write!(f, "resource is locked"),
            DavError::PreconditionFailed => write!(f, "precondition failed"),
            DavError::InsufficientStorage(r) => write!(f, "insufficient storage: {r:?}"),
            DavError::MethodNotAllowed => write!(f, "method not allowed"),
            DavError::UnknownDavMethod => write!(f, "unknown HTTP method"),
            DavError::Redirect(url) => write!(f, "redirect to {url}"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::XmlParseError => write!(f, "XML parse error"),
            DavError::Status(_) => write!(f, "Status code"),
            DavError::StatusClose(_) => write!(f, "Status code"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::XmlParseError
    }
}

impl From<std::str::Utf8Error> for DavError {
    fn from(_: std::str::Utf8Error) -> Self {
        DavError::BadRequest("invalid utf-8".to_string())
    }
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::Locked => StatusCode::LOCKED,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            DavError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Redirect(_) => StatusCode::FOUND,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// After these errors the connection is in an unknown state.
    pub fn must_close(&self) -> bool {
        match self {
            DavError::Status(_) => false,
            DavError::StatusClose(_) | DavError::UnknownDavMethod => true,
            DavError::IoError(e) => e.kind() == ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(DavError::NotAuthorized(vec![]).statuscode(), 401);
        assert_eq!(DavError::Locked.statuscode(), 423);
        assert_eq!(DavError::PreconditionFailed.statuscode(), 412);
        assert_eq!(
            DavError::InsufficientStorage(StorageErrorReason::QuotaExceeded).statuscode(),
            507
        );
        assert_eq!(DavError::UnknownDavMethod.statuscode(), 501);
        assert_eq!(DavError::MethodNotAllowed.statuscode(), 405);
    }

    #[test]
    fn client_disconnect_closes_connection() {
        let e = DavError::IoError(io::Error::new(ErrorKind::UnexpectedEof, "eof"));
        assert!(e.must_close());
        assert!(!DavError::NotFound.must_close());
    }
}
