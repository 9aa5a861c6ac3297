use thiserror::Error;

use crate::model::{Day, SlotId};
use crate::repository::RepositoryError;
use crate::store::StoreError;

/// Failures of the hold protocol. Conflicts and ownership violations are not
/// errors; they come back as outcomes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slot {0} not found")]
    SlotNotFound(SlotId),
    #[error("slot {0} is already booked")]
    SlotBooked(SlotId),
    #[error("day {day} is not enabled for holds")]
    DayNotEnabled { day: Day, enabled_days: Vec<Day> },
    #[error("no active admission period")]
    NoActivePeriod,
    #[error("gave up after {0} conflicting transaction attempts")]
    RetriesExhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => EngineError::SlotNotFound(id),
            RepositoryError::AlreadyBooked(id) => EngineError::SlotBooked(id),
            other => EngineError::Repository(other),
        }
    }
}

impl EngineError {
    /// Machine-readable reason shared by both transports.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotNotFound(_) => "slot_not_found",
            EngineError::SlotBooked(_) => "slot_booked",
            EngineError::DayNotEnabled { .. } => "day_not_enabled",
            EngineError::NoActivePeriod => "no_active_period",
            EngineError::RetriesExhausted(_)
            | EngineError::Store(_)
            | EngineError::Repository(_) => "internal",
        }
    }
}
