//! larder — appointment booking service for food pantries.
//!
//! Clients reserve a unit of a capacity-limited time slot on a calendar date;
//! staff book walk-ins. Admission, reschedule, and cancellation all commit
//! through a per-slot write lock plus a write-ahead log, so a (slot, date)
//! is never oversold and a booker never holds two active bookings on one day.

pub mod auth;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod outbox;
pub mod reaper;
pub mod wal;
