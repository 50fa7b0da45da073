use chrono::NaiveDate;
use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Slot full on the requested date at commit time.
    CapacityExceeded { slot_id: Ulid, date: NaiveDate, capacity: u32 },
    /// The booker already holds a non-cancelled booking on that date.
    DuplicateBooking { date: NaiveDate },
    /// Date outside the bookable window, or otherwise malformed input.
    InvalidDate { date: NaiveDate, reason: &'static str },
    /// Status transition not allowed from the booking's current state.
    InvalidTransition { id: Ulid, reason: &'static str },
    /// Slot still has non-cancelled bookings dated today or later.
    HasUpcomingBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::CapacityExceeded { slot_id, date, capacity } => {
                write!(f, "slot {slot_id} is full on {date}: capacity {capacity} reached")
            }
            EngineError::DuplicateBooking { date } => {
                write!(f, "client already holds a booking on {date}")
            }
            EngineError::InvalidDate { date, reason } => {
                write!(f, "invalid date {date}: {reason}")
            }
            EngineError::InvalidTransition { id, reason } => {
                write!(f, "booking {id}: {reason}")
            }
            EngineError::HasUpcomingBookings(id) => {
                write!(f, "cannot delete slot {id}: upcoming bookings exist")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
