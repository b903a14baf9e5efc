use ulid::Ulid;

use crate::model::AvailabilityFailure;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// Rejected before touching the calendar: malformed range, zero rooms,
    /// negative money, occupancy above the room's caps.
    Invalid(&'static str),
    /// The stay cannot be sold. Carries the first offending date.
    Unavailable(AvailabilityFailure),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "room not found: {id}"),
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Unavailable(failure) => {
                write!(f, "unavailable ({}): {}", failure.reason.as_str(), failure.message())
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
