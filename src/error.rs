use thiserror::Error;

use crate::model::RecordType;

/// SenseSafe client error types
#[derive(Error, Debug)]
pub enum SenseSafeError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Operation requires a {expected} session, current session is {actual}")]
    WrongRole {
        expected: RecordType,
        actual: RecordType,
    },

    #[error("Patient not found: {0}")]
    UnknownPatient(String),

    #[error("The server accepted the request but sent no session cookie")]
    MissingSessionCookie,

    #[error("The server returned a session token that could not be read")]
    UnreadableSessionToken,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Result type for client operations
pub type SResult<T> = Result<T, SenseSafeError>;

/// Session token decoding failures. All of them demote the session to logged out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("expected 3 token segments, found {0}")]
    SegmentCount(usize),

    #[error("invalid payload encoding: {0}")]
    Encoding(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("token expired at {0}")]
    Expired(i64),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ApiError::Decode(error.to_string())
        } else {
            ApiError::Transport(error.to_string())
        }
    }
}

/// Form validation failures, caught before any request is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Parent email is required for patients")]
    MissingParentEmail,

    #[error("Phone number is required for parents")]
    MissingPhoneNumber,

    #[error("Device information (serial, name, location) is required for patients and was not found. Check the app permissions and try again")]
    MissingDeviceInfo,

    #[error("Invalid {field} value: {value:?}")]
    InvalidCoordinate { field: &'static str, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{0} is unavailable on this device")]
    Unavailable(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("could not parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
}
