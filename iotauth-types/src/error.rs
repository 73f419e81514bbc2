use std::fmt::Display;

use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};
use thiserror::Error;

pub use http::StatusCode;
use tracing_error::SpanTrace;

/// The closed taxonomy of error kinds the auth core can surface (§7).
///
/// Every fallible operation in `iotauth-server` resolves to one of these
/// before it crosses the HTTP/gRPC boundary. The variant alone determines the
/// status code; the payload is for diagnostics only and is never serialized
/// to the client.
#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("authentication failed: {0}")]
    AuthenticationError(String),
    #[error("authorization denied")]
    AuthorizationError,
    #[error("token has no subject but the request targets a domain-scoped object")]
    DomainAuthorization,
    #[error("malformed entity: {0}")]
    MalformedEntity(String),
    #[error("object declared as platform is not the singleton platform id")]
    InvalidPlatform,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("compensating action failed: {rollback}, original error: {original}")]
    RollbackFailure {
        original: Box<ErrorKind>,
        rollback: Box<ErrorKind>,
    },
}

impl ErrorKind {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationError | Self::DomainAuthorization => StatusCode::FORBIDDEN,
            Self::MalformedEntity(_) | Self::InvalidPlatform => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RollbackFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A shared error type used to produce a public error and add additional
/// context for internal diagnostics. A public error is produced from the
/// inner error's [`Display`] implementation and `status_code` field. The
/// internal error report is created from the [`Debug`] implementation and
/// `span_trace` field.
#[serde_as]
#[derive(Error, Debug, Serialize)]
pub struct ApiError {
    // Only the Display format of the source error will be returned to the client.
    #[serde_as(as = "DisplayFromStr")]
    #[source]
    pub error: anyhow::Error,
    #[serde(skip)]
    pub status_code: StatusCode,
    #[serde(skip)]
    pub span_trace: Option<SpanTrace>,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let report = self.report();
        // Using Debug impl here in Display impl because ApiError
        // doesn't need the Display impl
        write!(f, "{report:?}")
    }
}

#[derive(Debug)]
pub struct Report {
    pub cause: String,
    pub span_trace: Option<SpanTrace>,
}

impl ApiError {
    #[must_use]
    pub fn bad_request() -> Self {
        Self {
            error: anyhow::Error::msg("Bad request"),
            status_code: StatusCode::BAD_REQUEST,
            span_trace: Some(SpanTrace::capture()),
        }
    }

    #[must_use]
    pub fn internal_error() -> Self {
        Self {
            error: anyhow::Error::msg("Internal error"),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            span_trace: Some(SpanTrace::capture()),
        }
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            error: anyhow::Error::msg("User is not authorized to perform this operation"),
            status_code: StatusCode::UNAUTHORIZED,
            span_trace: Some(SpanTrace::capture()),
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self {
            error: anyhow::Error::msg("Not found"),
            status_code: StatusCode::NOT_FOUND,
            span_trace: Some(SpanTrace::capture()),
        }
    }

    #[must_use]
    pub fn report(&self) -> Report {
        Report {
            cause: format!("{:?}", self.error.root_cause()),
            span_trace: self.span_trace.clone(),
        }
    }
}

impl From<ErrorKind> for ApiError {
    fn from(err: ErrorKind) -> Self {
        let status_code = err.status_code();
        Self {
            error: anyhow::Error::msg(err.to_string()),
            status_code,
            span_trace: Some(SpanTrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    pub struct DummyError {
        pub debug_field: String,
        pub display_field: String,
    }

    impl std::error::Error for DummyError {}

    impl Display for DummyError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", &self.display_field)
        }
    }

    #[test]
    fn serialize_api_error() {
        let err = DummyError {
            debug_field: "debug error".into(),
            display_field: "display error".into(),
        };
        let api_err = ApiError {
            error: err.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            span_trace: None,
        };

        let api_err_serialized = serde_json::to_string(&api_err).unwrap();
        assert_eq!(api_err_serialized, r#"{"error":"display error"}"#);
    }

    #[test]
    fn error_kind_status_codes() {
        assert_eq!(
            ErrorKind::AuthenticationError("expired".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorKind::AuthorizationError.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ErrorKind::InvalidPlatform.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorKind::Conflict("key".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorKind::RollbackFailure {
                original: Box::new(ErrorKind::NotFound("domain".into())),
                rollback: Box::new(ErrorKind::AuthorizationError),
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
