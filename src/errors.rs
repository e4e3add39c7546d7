use astra::Response;
// errors.rs
use std::fmt;

/// Errors originating from server logic (routing, validation, entity state)
/// or downstream layers (DB).
#[derive(Debug)]
pub enum ServerError {
    NotFound,
    /// Malformed input: unknown status value, missing required field, bad email.
    Validation(String),
    /// Operation invalid for the entity's current state
    /// (e.g. completing a viewing that is not scheduled).
    InvalidState(String),
    /// A sync run of this kind is already in progress.
    SyncBusy,
    /// The external CRM failed in a way that prevented a sync run from
    /// processing records at all.
    Upstream(String),
    DbError(String),
    InternalError,
}

// Type alias commonly used by route handlers.
pub type ResultResp = Result<Response, ServerError>;

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::NotFound => write!(f, "Not Found"),
            ServerError::Validation(msg) => write!(f, "Validation error: {msg}"),
            ServerError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            ServerError::SyncBusy => write!(f, "A sync run is already in progress"),
            ServerError::Upstream(msg) => write!(f, "Upstream CRM error: {msg}"),
            ServerError::DbError(msg) => write!(f, "Database Error: {msg}"),
            ServerError::InternalError => write!(f, "Internal Server Error"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<rusqlite::Error> for ServerError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => ServerError::NotFound,
            other => ServerError::DbError(other.to_string()),
        }
    }
}
