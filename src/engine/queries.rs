use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::window_availability;
use super::{Engine, EngineError, SharedSlotState};

impl Engine {
    /// Snapshot the slot arcs first: awaiting a slot lock while iterating the
    /// DashMap would hold a shard lock across the await.
    fn slot_arcs(&self) -> Vec<SharedSlotState> {
        self.slots.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn list_slots(&self) -> Vec<SlotInfo> {
        let mut out = Vec::new();
        for rs in self.slot_arcs() {
            let guard = rs.read().await;
            out.push(SlotInfo::from_state(&guard));
        }
        out.sort_by_key(|s| (s.starts_at, s.id));
        out
    }

    /// Remaining capacity per slot per date over `from..=to`.
    pub async fn availability(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        if to < from {
            return Err(EngineError::InvalidDate { date: to, reason: "window ends before it starts" });
        }
        if (to - from).num_days() >= MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let mut out = Vec::new();
        for rs in self.slot_arcs() {
            let guard = rs.read().await;
            out.push(SlotAvailability {
                slot: SlotInfo::from_state(&guard),
                days: window_availability(&guard, from, to),
            });
        }
        out.sort_by_key(|a| (a.slot.starts_at, a.slot.id));
        Ok(out)
    }

    /// All booking rows (any status) for one slot on one date.
    pub async fn bookings_on(
        &self,
        slot_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let rs = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let guard = rs.read().await;
        Ok(guard
            .on_date(date)
            .map(|b| BookingInfo::from_booking(slot_id, b))
            .collect())
    }

    /// All of the day's bookings across every slot (the staff desk view).
    pub async fn day_roster(&self, date: NaiveDate) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for rs in self.slot_arcs() {
            let guard = rs.read().await;
            out.extend(guard.on_date(date).map(|b| BookingInfo::from_booking(guard.id, b)));
        }
        out.sort_by_key(|b| b.id);
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<BookingInfo> {
        let slot_id = self.slot_of_booking(&id)?;
        let rs = self.get_slot(&slot_id)?;
        let guard = rs.read().await;
        guard.booking(id).map(|b| BookingInfo::from_booking(slot_id, b))
    }

    pub async fn booking_by_token(&self, token: Ulid) -> Option<BookingInfo> {
        let id = self.booking_for_token(&token)?;
        self.get_booking(id).await
    }
}
