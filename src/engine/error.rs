use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AppointmentStatus, ClockTime};
use crate::settings::SourceError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Holiday or a weekday the salon does not open. `reason` is display-ready.
    ClosedDay { date: NaiveDate, reason: String },
    OutsideHours { open: ClockTime, close: ClockTime },
    SlotConflict(Ulid),
    /// `attempted` is `None` for an edit, `Some(next)` for a status change.
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        attempted: Option<AppointmentStatus>,
    },
    NotFound { kind: &'static str, id: String },
    /// Lost a concurrent booking race at commit time.
    PersistenceConflict(Ulid),
    /// The appointment changed between read and commit.
    StaleWrite(Ulid),
    InvalidRequest(String),
    LimitExceeded(&'static str),
    SourceError(String),
    WalError(String),
}

impl EngineError {
    /// Stable label for metrics and wire responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ClosedDay { .. } => "closed_day",
            EngineError::OutsideHours { .. } => "outside_hours",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::NotFound { .. } => "not_found",
            EngineError::PersistenceConflict(_) => "persistence_conflict",
            EngineError::StaleWrite(_) => "stale_write",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::SourceError(_) => "source_error",
            EngineError::WalError(_) => "wal_error",
        }
    }

    /// Expected outcomes the caller recovers from, as opposed to faults.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EngineError::SourceError(_) | EngineError::WalError(_))
    }

    /// Both a validated conflict and a lost commit race mean the slot is taken.
    pub fn is_slot_taken(&self) -> bool {
        matches!(
            self,
            EngineError::SlotConflict(_) | EngineError::PersistenceConflict(_)
        )
    }

    pub(crate) fn service_not_found(id: &str) -> Self {
        EngineError::NotFound {
            kind: "service",
            id: id.to_string(),
        }
    }

    pub(crate) fn appointment_not_found(id: Ulid) -> Self {
        EngineError::NotFound {
            kind: "appointment",
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ClosedDay { reason, .. } => write!(f, "{reason}"),
            EngineError::OutsideHours { open, close } => {
                write!(f, "slot outside operating hours: open from {open} to {close}")
            }
            EngineError::SlotConflict(_) | EngineError::PersistenceConflict(_) => {
                write!(f, "slot already reserved")
            }
            EngineError::InvalidTransition { id, from, attempted: None } => {
                write!(f, "appointment {id} is {from} and can no longer be edited")
            }
            EngineError::InvalidTransition { id, from, attempted: Some(to) } => {
                write!(f, "appointment {id} cannot move from {from} to {to}")
            }
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::StaleWrite(id) => {
                write!(f, "appointment {id} was changed by someone else; reload and retry")
            }
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::SourceError(e) => write!(f, "configuration unavailable: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(id) => EngineError::PersistenceConflict(id),
            StoreError::NotFound(id) => EngineError::appointment_not_found(id),
            StoreError::Stale { id, .. } => EngineError::StaleWrite(id),
            StoreError::DayFull => EngineError::LimitExceeded("too many appointments on date"),
            StoreError::Io(e) => EngineError::WalError(e),
        }
    }
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        EngineError::SourceError(e.to_string())
    }
}
