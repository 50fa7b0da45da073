use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::SlotState;

use super::availability::active_count;
use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Last bookable date: the final day of the month after `today`'s.
pub(crate) fn booking_window_end(today: NaiveDate) -> NaiveDate {
    let (year, month) = if today.month() >= 11 {
        (today.year() + 1, today.month() - 10)
    } else {
        (today.year(), today.month() + 2)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("first of month is always valid")
        .pred_opt()
        .expect("date is nowhere near NaiveDate::MIN")
}

/// Bookings are accepted for today through the end of next month.
pub(crate) fn validate_booking_date(date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if date < today {
        return Err(EngineError::InvalidDate { date, reason: "date is in the past" });
    }
    if date > booking_window_end(today) {
        return Err(EngineError::InvalidDate { date, reason: "date is beyond the booking window" });
    }
    Ok(())
}

pub(crate) fn validate_note(note: Option<&str>) -> Result<(), EngineError> {
    if let Some(n) = note
        && n.len() > MAX_NOTE_LEN {
            return Err(EngineError::LimitExceeded("note too long"));
        }
    Ok(())
}

/// The admission check: one free capacity unit must remain on `date`.
/// `exclude` removes a booking's own row from the count; reschedules must
/// not count the row they are about to move.
pub(crate) fn check_capacity(
    rs: &SlotState,
    date: NaiveDate,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let taken = active_count(rs, date, exclude);
    if taken >= rs.capacity {
        return Err(EngineError::CapacityExceeded {
            slot_id: rs.id,
            date,
            capacity: rs.capacity,
        });
    }
    Ok(())
}
