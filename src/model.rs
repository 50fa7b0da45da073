use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Who holds a booking: exactly one client identity per booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Booker {
    /// Self-service client account.
    Registered(Ulid),
    /// Client record entered by staff at the desk.
    WalkIn(Ulid),
}

impl Booker {
    pub fn client_id(&self) -> Ulid {
        match self {
            Booker::Registered(id) | Booker::WalkIn(id) => *id,
        }
    }

    pub fn is_walk_in(&self) -> bool {
        matches!(self, Booker::WalkIn(_))
    }
}

/// The closed status set. `Approved` is the only active state; the rest are
/// terminal. Cancelled rows stay in the slot for history but hold neither a
/// capacity unit nor a day claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Approved,
    Cancelled,
    NoShow,
    Visited,
}

impl BookingStatus {
    /// Everything except `Cancelled` occupies a capacity unit on its date.
    pub fn counts_against_capacity(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Approved)
    }
}

/// Post-appointment disposition, recorded by staff or the overdue sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Visited,
    NoShow,
}

impl From<Outcome> for BookingStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Visited => BookingStatus::Visited,
            Outcome::NoShow => BookingStatus::NoShow,
        }
    }
}

/// One reservation of one capacity unit of a slot on a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub booker: Booker,
    pub date: NaiveDate,
    pub status: BookingStatus,
    /// Opaque secret authorizing no-login reschedule/cancel. Present while
    /// the booking is still open; invalidated when it closes.
    pub token: Option<Ulid>,
    pub note: Option<String>,
    /// Set when staff created the booking, regardless of booker kind.
    pub via_staff: bool,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Approved
    }
}

#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub name: String,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
    /// Max concurrent bookings per date (≥ 1).
    pub capacity: u32,
    /// All booking rows (any status), sorted by `date`.
    pub bookings: Vec<Booking>,
}

impl SlotState {
    pub fn new(id: Ulid, name: String, starts_at: NaiveTime, ends_at: NaiveTime, capacity: u32) -> Self {
        Self {
            id,
            name,
            starts_at,
            ends_at,
            capacity,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by date.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self.bookings.partition_point(|b| b.date <= booking.date);
        self.bookings.insert(pos, booking);
    }

    /// Remove a booking row by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only the bookings on the given date.
    /// Uses binary search to skip rows on earlier and later dates.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        self.bookings[lo..hi].iter()
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        name: String,
        starts_at: NaiveTime,
        ends_at: NaiveTime,
        capacity: u32,
    },
    SlotUpdated {
        id: Ulid,
        name: String,
        starts_at: NaiveTime,
        ends_at: NaiveTime,
        capacity: u32,
    },
    SlotDeleted {
        id: Ulid,
    },
    BookingAdmitted {
        id: Ulid,
        slot_id: Ulid,
        booker: Booker,
        date: NaiveDate,
        /// `None` only for closed bookings re-emitted by compaction.
        token: Option<Ulid>,
        note: Option<String>,
        via_staff: bool,
    },
    BookingRescheduled {
        id: Ulid,
        from_slot: Ulid,
        to_slot: Ulid,
        date: NaiveDate,
        token: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        slot_id: Ulid,
    },
    OutcomeRecorded {
        id: Ulid,
        slot_id: Ulid,
        outcome: Outcome,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: Ulid,
    pub name: String,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
    pub capacity: u32,
}

impl SlotInfo {
    pub fn from_state(rs: &SlotState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            starts_at: rs.starts_at,
            ends_at: rs.ends_at,
            capacity: rs.capacity,
        }
    }
}

/// Booking as surfaced to callers. The booker enum is flattened back into the
/// two mutually exclusive reference fields of the public contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub date: NaiveDate,
    pub status: BookingStatus,
    pub client_id: Option<Ulid>,
    pub walk_in_id: Option<Ulid>,
    pub via_staff: bool,
    pub note: Option<String>,
    pub reschedule_token: Option<Ulid>,
}

impl BookingInfo {
    pub fn from_booking(slot_id: Ulid, b: &Booking) -> Self {
        let (client_id, walk_in_id) = match b.booker {
            Booker::Registered(id) => (Some(id), None),
            Booker::WalkIn(id) => (None, Some(id)),
        };
        Self {
            id: b.id,
            slot_id,
            date: b.date,
            status: b.status,
            client_id,
            walk_in_id,
            via_staff: b.via_staff,
            note: b.note.clone(),
            reschedule_token: b.token,
        }
    }
}

/// Remaining capacity for one slot on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub remaining: u32,
}

/// A slot's availability over a queried date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub slot: SlotInfo,
    pub days: Vec<DayAvailability>,
}
