//! Operation result model shared by every sync target.
//!
//! Every adapter operation returns [`SyncResult`]. A failure carries an
//! [`ErrorKind`], an optional message and an optional cause, and never a
//! success payload.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// Classification of a failed sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Target disabled or lacking authorization.
    PermissionDenied,
    /// Remote system rejected the operation, or a required lookup found no match.
    ApiError,
    /// Transport exception, serialization failure or any unanticipated fault.
    UnknownError,
}

impl ErrorKind {
    /// Short user-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::ApiError => "api error",
            ErrorKind::UnknownError => "unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared, cloneable error cause.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure half of a sync operation outcome.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    kind: ErrorKind,
    message: Option<String>,
    cause: Option<Cause>,
}

/// Outcome of a sync operation.
pub type SyncResult<T> = std::result::Result<T, SyncFailure>;

impl SyncFailure {
    /// Create a failure of the given kind without detail.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
        }
    }

    /// Target is disabled or not authorized.
    pub fn permission_denied() -> Self {
        Self::new(ErrorKind::PermissionDenied)
    }

    /// Remote rejected the operation or a lookup came back empty.
    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiError).with_message(message)
    }

    /// Unanticipated fault with its cause.
    pub fn unknown<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorKind::UnknownError).with_cause(cause)
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a cause.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Render the message shown to the user for this failure.
    ///
    /// The kind label is followed by the message, or by the cause when no
    /// message was given.
    pub fn user_message(&self) -> String {
        let mut rendered = self.kind.label().to_string();
        if let Some(message) = &self.message {
            rendered.push_str(&format!(" ({})", message));
        } else if let Some(cause) = &self.cause {
            rendered.push_str(&format!(" ({})", cause));
        }
        rendered
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for SyncFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<Error> for SyncFailure {
    /// Remote rejections become `ApiError`; everything else is `UnknownError`
    /// carrying the original error.
    fn from(err: Error) -> Self {
        match err {
            Error::Api { status, body } => {
                SyncFailure::api(format!("response error {} {}", status, body))
            }
            other => SyncFailure::unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_user_message_prefers_message() {
        let failure = SyncFailure::api("no weight entry found for date: 2024-01-05")
            .with_cause(Error::Network("reset".to_string()));
        assert_eq!(
            failure.user_message(),
            "api error (no weight entry found for date: 2024-01-05)"
        );
    }

    #[test]
    fn test_user_message_falls_back_to_cause() {
        let failure = SyncFailure::unknown(Error::Network("connection refused".to_string()));
        assert_eq!(
            failure.user_message(),
            "unknown error (Network error: connection refused)"
        );
        assert!(failure.source().is_some());
    }

    #[test]
    fn test_permission_denied_has_no_detail() {
        let failure = SyncFailure::permission_denied();
        assert_eq!(failure.kind(), ErrorKind::PermissionDenied);
        assert_eq!(failure.user_message(), "permission denied");
        assert!(failure.message().is_none());
    }

    #[test]
    fn test_from_api_error() {
        let failure: SyncFailure = Error::Api {
            status: 400,
            body: "bad date".to_string(),
        }
        .into();
        assert_eq!(failure.kind(), ErrorKind::ApiError);
        assert_eq!(failure.message(), Some("response error 400 bad date"));
    }

    #[test]
    fn test_from_transport_error_keeps_cause() {
        let failure: SyncFailure = Error::Timeout("publish".to_string()).into();
        assert_eq!(failure.kind(), ErrorKind::UnknownError);
        assert!(failure.cause().is_some());
    }
}
