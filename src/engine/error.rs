use ulid::Ulid;

use crate::legacy::LegacyError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, rejected before any store is touched.
    InvalidRequest(String),
    /// No capacity can be resolved for a slot.
    Configuration(&'static str),
    NotFound(Ulid),
    Store(StoreError),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidRequest(msg.into())
    }

    /// True when the caller can fix the request; false for internal failures.
    pub fn is_client_error(&self) -> bool {
        matches!(self, EngineError::InvalidRequest(_) | EngineError::NotFound(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Configuration(msg) => write!(f, "insufficient configuration: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Store(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<LegacyError> for EngineError {
    fn from(e: LegacyError) -> Self {
        EngineError::InvalidRequest(e.to_string())
    }
}
