//! Kubernetes `Status` JSON error objects and the stable
//! error-kind taxonomy they are built from.

use serde::Serialize;
use std::fmt;

/// Stable, externally meaningful error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingToken,
    InvalidSignature,
    ExpiredChallenge,
    InsufficientStake,
    PermissionDenied,
    NotFound,
    ChainUnavailable,
    Timeout,
    DispatchFailed,
    ConflictingWorker,
    BadRequest,
    PayloadTooLarge,
}

impl ErrorKind {
    pub fn http_code(self) -> u16 {
        match self {
            ErrorKind::MissingToken | ErrorKind::InvalidSignature | ErrorKind::ExpiredChallenge => 401,
            ErrorKind::InsufficientStake | ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest | ErrorKind::ConflictingWorker => 400,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::ChainUnavailable => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::DispatchFailed => 500,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            ErrorKind::MissingToken | ErrorKind::InvalidSignature | ErrorKind::ExpiredChallenge => "Unauthorized",
            ErrorKind::InsufficientStake | ErrorKind::PermissionDenied => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ChainUnavailable => "ServiceUnavailable",
            ErrorKind::DispatchFailed => "InternalError",
            ErrorKind::ConflictingWorker => "Conflict",
            ErrorKind::BadRequest | ErrorKind::PayloadTooLarge => "BadRequest",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// A Kubernetes `Status` object of kind `Failure`, the wire format every
/// client-visible gateway error uses.
#[derive(Debug, Clone, Serialize)]
pub struct KubeStatus {
    #[serde(rename = "apiVersion")]
    pub api_version: &'static str,
    pub kind: &'static str,
    pub status: &'static str,
    pub message: String,
    pub reason: &'static str,
    pub code: u16,
}

impl KubeStatus {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            api_version: "v1",
            kind: "Status",
            status: "Failure",
            message: message.into(),
            reason: kind.reason(),
            code: kind.http_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_kinds_map_to_401() {
        for kind in [ErrorKind::MissingToken, ErrorKind::InvalidSignature, ErrorKind::ExpiredChallenge] {
            assert_eq!(kind.http_code(), 401);
        }
    }

    #[test]
    fn status_object_matches_wire_shape() {
        let status = KubeStatus::failure(ErrorKind::PermissionDenied, "forbidden: insufficient capability");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Status");
        assert_eq!(json["status"], "Failure");
        assert_eq!(json["reason"], "Forbidden");
        assert_eq!(json["code"], 403);
    }
}
