use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Count bookings holding a capacity unit on `date`.
/// `exclude` drops one row from the count (self-exclusion on reschedule).
pub fn active_count(rs: &SlotState, date: NaiveDate, exclude: Option<Ulid>) -> u32 {
    rs.on_date(date)
        .filter(|b| b.status.counts_against_capacity())
        .filter(|b| exclude != Some(b.id))
        .count() as u32
}

/// Free capacity units on `date`. Clamps at zero: a capacity reduction may
/// leave a date holding more bookings than the slot now allows.
pub fn remaining_on(rs: &SlotState, date: NaiveDate) -> u32 {
    rs.capacity.saturating_sub(active_count(rs, date, None))
}

/// Remaining capacity for each date in `from..=to`.
pub fn window_availability(rs: &SlotState, from: NaiveDate, to: NaiveDate) -> Vec<DayAvailability> {
    let mut days = Vec::new();
    let mut date = from;
    while date <= to {
        days.push(DayAvailability {
            date,
            remaining: remaining_on(rs, date),
        });
        date = date.succ_opt().expect("date is nowhere near NaiveDate::MAX");
    }
    days
}
