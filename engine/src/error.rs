//! Error taxonomy shared by the gateway, the cache and the sync managers

use thiserror::Error;

/// Failure of a single remote API call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// No session token available, nothing was sent
    #[error("no active session")]
    SessionMissing,

    /// Transport failure, the station never answered
    #[error("station unreachable: {0}")]
    ConnectionUnreachable(String),

    /// The station rejected the session token (codes 105-107)
    #[error("session expired (code {0})")]
    SessionExpired(i64),

    /// Any other structured failure reported by the station
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The payload did not match the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiError {
    /// Build an `Api` error with the station's description of `code`
    pub fn from_code(code: i64) -> Self {
        ApiError::Api {
            code,
            message: describe_code(code).to_string(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired(_))
    }
}

/// True for the error codes the station uses for a dead session
pub fn is_session_expiry_code(code: i64) -> bool {
    (105..=107).contains(&code)
}

/// Human-readable description of a download-station error code
pub fn describe_code(code: i64) -> &'static str {
    match code {
        100 => "Unknown error",
        101 => "Invalid parameter",
        102 => "The requested API does not exist",
        103 => "The requested method does not exist",
        104 => "The requested version does not support the functionality",
        105 => "The logged in session does not have permission",
        106 => "Session timeout",
        107 => "Session interrupted by duplicate login",
        400 => "File upload failed",
        401 => "Max number of tasks reached",
        402 => "Destination denied",
        403 => "Destination does not exist",
        404 => "Invalid task id",
        405 => "Invalid task action",
        406 => "No default destination",
        407 => "Set destination failed",
        408 => "File does not exist",
        600 => "Search keyword is missing",
        601 => "Search module is not available",
        _ => "An error occurred",
    }
}

/// Failure of the local cache store
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a session operation (login, logout, restore)
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a login is already in progress")]
    LoginInProgress,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("secret store error: {0}")]
    Store(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result of a user action or of a refresh cycle
#[derive(Debug, Error)]
pub enum SyncError {
    /// Action rejected locally because the session is not connected
    #[error("not connected")]
    NotConnected,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The owning queue was cancelled while the work was in flight
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl SyncError {
    /// Snapshot could not be decoded; the cache was left untouched
    pub fn is_malformed(&self) -> bool {
        matches!(self, SyncError::Api(ApiError::MalformedResponse(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_range_is_105_to_107() {
        assert!(!is_session_expiry_code(104));
        assert!(is_session_expiry_code(105));
        assert!(is_session_expiry_code(106));
        assert!(is_session_expiry_code(107));
        assert!(!is_session_expiry_code(108));
    }

    #[test]
    fn from_code_carries_description() {
        let err = ApiError::from_code(404);
        assert_eq!(
            err,
            ApiError::Api {
                code: 404,
                message: "Invalid task id".into()
            }
        );
        assert_eq!(err.to_string(), "API error 404: Invalid task id");
    }
}
