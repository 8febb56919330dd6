use std::{borrow::Cow, fmt, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::{
    transport::TransportFailure, types::RequestDescriptor, ERROR_CODE_REQUEST,
    ERROR_CODE_REQUEST_ABORT, ERROR_CODE_REQUEST_BREAK, ERROR_CODE_TIME_OUT,
};

/// Error code vocabulary shared by every failure path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A pre-flight hook vetoed the request.
    Break,
    /// The attempt was cancelled (explicitly or through its token).
    Abort,
    /// Generic transport-level failure.
    Request,
    /// The configured timeout elapsed.
    Timeout,
    /// Non-success HTTP status.
    Status(u16),
    /// Code produced by a response classifier.
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            ErrorCode::Break => Cow::Borrowed(ERROR_CODE_REQUEST_BREAK),
            ErrorCode::Abort => Cow::Borrowed(ERROR_CODE_REQUEST_ABORT),
            ErrorCode::Request => Cow::Borrowed(ERROR_CODE_REQUEST),
            ErrorCode::Timeout => Cow::Borrowed(ERROR_CODE_TIME_OUT),
            ErrorCode::Status(status) => Cow::Owned(status.to_string()),
            ErrorCode::Custom(code) => Cow::Borrowed(code.as_str()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            ERROR_CODE_REQUEST_BREAK => ErrorCode::Break,
            ERROR_CODE_REQUEST_ABORT => ErrorCode::Abort,
            ERROR_CODE_REQUEST => ErrorCode::Request,
            ERROR_CODE_TIME_OUT => ErrorCode::Timeout,
            other => match other.parse::<u16>() {
                Ok(status) => ErrorCode::Status(status),
                Err(_) => ErrorCode::Custom(other.to_string()),
            },
        }
    }
}

/// Normalized error every failed request resolves to.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub code: ErrorCode,
    pub message: Option<String>,
    /// Extra payload attached by a classifier rejection.
    pub data: Option<Value>,
    /// Descriptor of the request that failed.
    pub request: RequestDescriptor,
    pub cause: Option<Arc<TransportFailure>>,
}

impl RequestError {
    pub fn new(code: ErrorCode, request: RequestDescriptor) -> Self {
        Self {
            code,
            message: None,
            data: None,
            request,
            cause: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_cause(mut self, cause: TransportFailure) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn is_abort(&self) -> bool {
        self.code == ErrorCode::Abort
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    /// HTTP status for `Status` codes.
    pub fn status(&self) -> Option<u16> {
        match self.code {
            ErrorCode::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias for fallible crate results.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-level error for construction and typed decoding.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Request(#[from] RequestError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_strings() {
        for code in [
            ErrorCode::Break,
            ErrorCode::Abort,
            ErrorCode::Request,
            ErrorCode::Timeout,
            ErrorCode::Status(404),
            ErrorCode::Custom("BIZ_FAIL".into()),
        ] {
            assert_eq!(ErrorCode::from(&*code.as_str()), code);
        }
        assert_eq!(ErrorCode::Status(503).to_string(), "503");
        assert_eq!(ErrorCode::Timeout.to_string(), "TIME_OUT");
    }

    #[test]
    fn display_includes_message_when_set() {
        let request = RequestDescriptor::new("https://api.test/users");
        let err = RequestError::new(ErrorCode::Status(500), request.clone())
            .with_message("boom");
        assert_eq!(err.to_string(), "500: boom");

        let bare = RequestError::new(ErrorCode::Abort, request);
        assert_eq!(bare.to_string(), "REQUEST_ABORT");
        assert!(bare.is_abort());
        assert_eq!(bare.status(), None);
    }

    #[test]
    fn source_exposes_transport_cause() {
        use std::error::Error as _;

        let err = RequestError::new(ErrorCode::Request, RequestDescriptor::new("x"))
            .with_cause(TransportFailure::Body {
                message: "truncated".into(),
            });
        assert!(err.source().is_some());
    }
}
