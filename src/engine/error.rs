use ulid::Ulid;

use crate::model::BookingStatus;

/// Every failure an engine operation can surface. Business-rule failures are
/// terminal for the request; the caller re-requests with corrected input.
#[derive(Debug)]
pub enum EngineError {
    /// Booking or slot absent.
    NotFound(Ulid),
    /// Actor is not a party to the booking, or lacks the role for the edge.
    Forbidden(&'static str),
    /// No such edge in the transition table.
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Precondition on the current state failed.
    InvalidState(&'static str),
    /// Requested interval overlaps an existing slot or active booking.
    SlotConflict(Ulid),
    AlreadyPaid(Ulid),
    LimitExceeded(&'static str),
    /// A bounded wait expired before the store answered.
    Timeout(&'static str),
    /// Store or collaborator unreachable.
    Unavailable(&'static str),
    JournalError(String),
}

impl EngineError {
    /// Stable machine-readable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::AlreadyPaid(_) => "already_paid",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Timeout(_) => "timeout",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::JournalError(_) => "journal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot transition from {} to {}", from.label(), to.label())
            }
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::SlotConflict(id) => write!(f, "slot conflict with: {id}"),
            EngineError::AlreadyPaid(id) => write!(f, "booking already paid: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Timeout(what) => write!(f, "timed out waiting for {what}"),
            EngineError::Unavailable(what) => write!(f, "unavailable: {what}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
