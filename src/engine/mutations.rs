use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::outbox::Notice;

use super::admission::{check_capacity, today, validate_booking_date, validate_note};
use super::{apply_reschedule, Engine, EngineError, SharedSlotState, WalCommand};

fn validate_slot_shape(
    name: &str,
    starts_at: NaiveTime,
    ends_at: NaiveTime,
    capacity: u32,
) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("slot name too long"));
    }
    if capacity == 0 {
        return Err(EngineError::LimitExceeded("capacity must be at least 1"));
    }
    if capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if starts_at >= ends_at {
        return Err(EngineError::LimitExceeded("slot must start before it ends"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_slot(
        &self,
        id: Ulid,
        name: String,
        starts_at: NaiveTime,
        ends_at: NaiveTime,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if self.slots.len() >= MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        validate_slot_shape(&name, starts_at, ends_at, capacity)?;
        if self.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SlotCreated { id, name: name.clone(), starts_at, ends_at, capacity };
        self.wal_append(&event).await?;
        let rs = SlotState::new(id, name, starts_at, ends_at, capacity);
        self.slots.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_slot(
        &self,
        id: Ulid,
        name: String,
        starts_at: NaiveTime,
        ends_at: NaiveTime,
        capacity: u32,
    ) -> Result<(), EngineError> {
        validate_slot_shape(&name, starts_at, ends_at, capacity)?;
        let rs = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::SlotUpdated { id, name, starts_at, ends_at, capacity };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Delete a slot. Refused while any non-cancelled booking dated today or
    /// later exists; slots holding only history are removed.
    pub async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        let today = today();
        if guard
            .bookings
            .iter()
            .any(|b| b.status.counts_against_capacity() && b.date >= today)
        {
            return Err(EngineError::HasUpcomingBookings(id));
        }

        let event = Event::SlotDeleted { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.index.forget_booking(b);
        }
        // Removing the map entry under the slot's write lock fences racing
        // admissions: they either finished before us or find the slot gone.
        self.slots.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// The admission routine. Capacity count, day claim, and WAL commit all
    /// happen under the slot's write lock, so concurrent admissions for the
    /// same (slot, date) serialize and the loser sees the updated count.
    pub async fn admit_booking(
        &self,
        id: Ulid,
        slot_id: Ulid,
        booker: Booker,
        date: NaiveDate,
        note: Option<String>,
        via_staff: bool,
    ) -> Result<BookingInfo, EngineError> {
        validate_booking_date(date, today())?;
        validate_note(note.as_deref())?;
        let rs = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many bookings on slot"));
        }

        check_capacity(&guard, date, None).inspect_err(|_| {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => "capacity")
                .increment(1);
        })?;

        // One booking per booker per date, across all slots. The claim is
        // atomic; it is rolled back below if the WAL append fails.
        self.index.claim_day(booker, date, id).inspect_err(|_| {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => "duplicate")
                .increment(1);
        })?;

        let token = Ulid::new();
        let event = Event::BookingAdmitted {
            id,
            slot_id,
            booker,
            date,
            token: Some(token),
            note,
            via_staff,
        };
        if let Err(e) = self.persist_and_apply(slot_id, &mut guard, &event).await {
            self.index.release_day(booker, date, id);
            return Err(e);
        }

        metrics::counter!(crate::observability::BOOKINGS_ADMITTED_TOTAL).increment(1);
        let info = BookingInfo::from_booking(slot_id, guard.booking(id).expect("booking just admitted"));
        self.outbox.send(Notice::Confirmed {
            booking_id: id,
            slot_name: guard.name.clone(),
            date,
            token,
        });
        Ok(info)
    }

    /// Token-authorized reschedule (the no-login client path).
    pub async fn reschedule_by_token(
        &self,
        token: Ulid,
        to_slot: Ulid,
        date: NaiveDate,
    ) -> Result<BookingInfo, EngineError> {
        let booking_id = self
            .booking_for_token(&token)
            .ok_or(EngineError::NotFound(token))?;
        self.reschedule_booking(booking_id, to_slot, date).await
    }

    /// Move a booking to (to_slot, date). The destination capacity check
    /// excludes the booking's own row, so a same-slot move never counts
    /// itself. Any failure leaves the booking exactly where it was.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        to_slot: Ulid,
        date: NaiveDate,
    ) -> Result<BookingInfo, EngineError> {
        validate_booking_date(date, today())?;
        let from_slot = self.slot_of_booking(&id).ok_or(EngineError::NotFound(id))?;
        let src_arc = self.get_slot(&from_slot).ok_or(EngineError::NotFound(from_slot))?;
        let dst_arc: Option<SharedSlotState> = if from_slot == to_slot {
            None
        } else {
            Some(self.get_slot(&to_slot).ok_or(EngineError::NotFound(to_slot))?)
        };

        // Acquire write locks in sorted-id order to prevent deadlocks.
        let (mut src, mut dst) = match dst_arc {
            None => (src_arc.write_owned().await, None),
            Some(dst_arc) if from_slot < to_slot => {
                let s = src_arc.write_owned().await;
                let d = dst_arc.write_owned().await;
                (s, Some(d))
            }
            Some(dst_arc) => {
                let d = dst_arc.write_owned().await;
                let s = src_arc.write_owned().await;
                (s, Some(d))
            }
        };

        let booking = src.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.is_active() {
            return Err(EngineError::InvalidTransition {
                id,
                reason: "only approved bookings can be rescheduled",
            });
        }
        let booker = booking.booker;
        let old_date = booking.date;

        {
            let dest_state: &SlotState = dst.as_deref().unwrap_or(&src);
            if dest_state.bookings.len() >= MAX_BOOKINGS_PER_SLOT {
                return Err(EngineError::LimitExceeded("too many bookings on slot"));
            }
            check_capacity(dest_state, date, Some(id)).inspect_err(|_| {
                metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => "capacity")
                    .increment(1);
            })?;
        }

        // Claim the destination date. The booking's own claim (same-date
        // move) passes; a foreign claim rejects with the booking untouched.
        self.index.claim_day(booker, date, id)?;

        let new_token = Ulid::new();
        let event = Event::BookingRescheduled { id, from_slot, to_slot, date, token: new_token };
        if let Err(e) = self.wal_append(&event).await {
            if date != old_date {
                self.index.release_day(booker, date, id);
            }
            return Err(e);
        }
        apply_reschedule(&mut src, dst.as_deref_mut(), to_slot, id, date, new_token, &self.index);
        self.notify.send(from_slot, &event);
        if from_slot != to_slot {
            self.notify.send(to_slot, &event);
        }

        let dest_state: &SlotState = dst.as_deref().unwrap_or(&src);
        let info = BookingInfo::from_booking(to_slot, dest_state.booking(id).expect("booking just moved"));
        self.outbox.send(Notice::Moved {
            booking_id: id,
            slot_name: dest_state.name.clone(),
            date,
            token: new_token,
        });
        Ok(info)
    }

    /// Token-authorized cancel (the no-login client path).
    pub async fn cancel_by_token(&self, token: Ulid) -> Result<BookingInfo, EngineError> {
        let booking_id = self
            .booking_for_token(&token)
            .ok_or(EngineError::NotFound(token))?;
        self.cancel_booking(booking_id).await
    }

    /// Cancel an approved booking, releasing its capacity unit and day claim.
    /// The row is retained for history.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let (slot_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.is_active() {
            return Err(EngineError::InvalidTransition { id, reason: "booking is already closed" });
        }
        let date = booking.date;

        let event = Event::BookingCancelled { id, slot_id };
        self.persist_and_apply(slot_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);

        let info = BookingInfo::from_booking(slot_id, guard.booking(id).expect("row is retained"));
        self.outbox.send(Notice::Cancelled { booking_id: id, slot_name: guard.name.clone(), date });
        Ok(info)
    }

    /// Close an appointment as visited or no-show. The date must have
    /// arrived; the day claim stays (the status is non-cancelled).
    pub async fn record_outcome(&self, id: Ulid, outcome: Outcome) -> Result<BookingInfo, EngineError> {
        let (slot_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.is_active() {
            return Err(EngineError::InvalidTransition {
                id,
                reason: "booking is cancelled or already has an outcome",
            });
        }
        if booking.date > today() {
            return Err(EngineError::InvalidDate {
                date: booking.date,
                reason: "cannot record an outcome before the appointment date",
            });
        }

        let event = Event::OutcomeRecorded { id, slot_id, outcome };
        self.persist_and_apply(slot_id, &mut guard, &event).await?;
        Ok(BookingInfo::from_booking(slot_id, guard.booking(id).expect("row is retained")))
    }

    /// Approved bookings whose date has passed, for the no-show sweeper.
    /// Bookings are date-sorted per slot, so each scan stops early.
    pub fn collect_overdue(&self, as_of: NaiveDate) -> Vec<Ulid> {
        let mut overdue = Vec::new();
        for entry in self.slots.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for b in &guard.bookings {
                    if b.date >= as_of {
                        break;
                    }
                    if b.is_active() {
                        overdue.push(b.id);
                    }
                }
            }
        }
        overdue
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state: each slot, its bookings, and their terminal statuses.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Read-lock every slot in sorted-id order (the same order mutations
        // use) before snapshotting: a reschedule landing between per-slot
        // snapshots would otherwise emit its booking twice or not at all.
        let mut arcs: Vec<(Ulid, SharedSlotState)> = self
            .slots
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        arcs.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(arcs.len());
        for (_, rs) in &arcs {
            guards.push(rs.clone().read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::SlotCreated {
                id: guard.id,
                name: guard.name.clone(),
                starts_at: guard.starts_at,
                ends_at: guard.ends_at,
                capacity: guard.capacity,
            });
            for b in &guard.bookings {
                events.push(Event::BookingAdmitted {
                    id: b.id,
                    slot_id: guard.id,
                    booker: b.booker,
                    date: b.date,
                    token: b.token,
                    note: b.note.clone(),
                    via_staff: b.via_staff,
                });
                match b.status {
                    BookingStatus::Approved => {}
                    BookingStatus::Cancelled => {
                        events.push(Event::BookingCancelled { id: b.id, slot_id: guard.id });
                    }
                    BookingStatus::NoShow => {
                        events.push(Event::OutcomeRecorded { id: b.id, slot_id: guard.id, outcome: Outcome::NoShow });
                    }
                    BookingStatus::Visited => {
                        events.push(Event::OutcomeRecorded { id: b.id, slot_id: guard.id, outcome: Outcome::Visited });
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
