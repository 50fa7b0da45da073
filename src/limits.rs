//! Hard limits checked at the mutation boundary. Requests beyond these are
//! rejected with `EngineError::LimitExceeded`, never silently truncated.

/// Max slots a single pantry may define.
pub const MAX_SLOTS: usize = 512;

/// Max booking rows (any status) retained per slot.
pub const MAX_BOOKINGS_PER_SLOT: usize = 100_000;

/// Max slot capacity. A pantry lane serving more than this per slot is a
/// configuration error, not a real schedule.
pub const MAX_CAPACITY: u32 = 1_000;

/// Max length of a slot name.
pub const MAX_NAME_LEN: usize = 128;

/// Max length of a booking note.
pub const MAX_NOTE_LEN: usize = 512;

/// Widest from..=to range an availability query may span, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 62;

/// Outbox queue depth before confirmation notices are dropped (and counted).
pub const OUTBOX_CAPACITY: usize = 1_024;
