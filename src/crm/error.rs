use std::error::Error;
use std::fmt;

/// Failures talking to the external CRM. Only `Transient` is eligible for
/// retry; everything else surfaces immediately.
#[derive(Debug)]
pub enum CrmError {
    /// Login rejected or session no longer valid.
    Auth(String),
    /// Timeout, connection failure, or a 5xx from the remote.
    Transient(String),
    /// Malformed response body or an application-level error the remote
    /// reported ({code, message}).
    Structural(String),
    /// A stage name with no counterpart on the remote. Surfaced instead of
    /// silently falling back to a default stage.
    UnmappedStage(String),
}

impl CrmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CrmError::Transient(_))
    }
}

impl fmt::Display for CrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrmError::Auth(msg) => write!(f, "CRM authentication failed: {msg}"),
            CrmError::Transient(msg) => write!(f, "Transient CRM error: {msg}"),
            CrmError::Structural(msg) => write!(f, "CRM error: {msg}"),
            CrmError::UnmappedStage(name) => write!(f, "No CRM stage named '{name}'"),
        }
    }
}

impl Error for CrmError {}
