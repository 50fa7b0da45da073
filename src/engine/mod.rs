mod admission;
mod availability;
mod error;
mod mutations;
mod queries;

pub use availability::{active_count, remaining_on, window_availability};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::outbox::Outbox;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Booking indexes ──────────────────────────────────────

/// Cross-slot lookup tables. `day_claims` is the in-memory form of the
/// partial unique index `(user_id, date) WHERE status <> 'cancelled'`:
/// one entry per booker per date, present exactly while a non-cancelled
/// booking exists.
pub(super) struct BookingIndex {
    /// booking id → slot id
    slot_of: DashMap<Ulid, Ulid>,
    /// reschedule token → booking id
    token_of: DashMap<Ulid, Ulid>,
    /// (booker, date) → the non-cancelled booking holding that day
    day_claims: DashMap<(Booker, NaiveDate), Ulid>,
}

impl BookingIndex {
    fn new() -> Self {
        Self {
            slot_of: DashMap::new(),
            token_of: DashMap::new(),
            day_claims: DashMap::new(),
        }
    }

    /// Atomically claim (booker, date). The `entry` call is the linearization
    /// point for the one-booking-per-day rule across slots.
    pub(super) fn claim_day(
        &self,
        booker: Booker,
        date: NaiveDate,
        booking_id: Ulid,
    ) -> Result<(), EngineError> {
        match self.day_claims.entry((booker, date)) {
            Entry::Occupied(held) => {
                // The booking's own claim is not a conflict (same-date reschedule).
                if *held.get() == booking_id {
                    Ok(())
                } else {
                    Err(EngineError::DuplicateBooking { date })
                }
            }
            Entry::Vacant(v) => {
                v.insert(booking_id);
                Ok(())
            }
        }
    }

    /// Release a claim, but only if this booking still holds it.
    pub(super) fn release_day(&self, booker: Booker, date: NaiveDate, booking_id: Ulid) {
        self.day_claims
            .remove_if(&(booker, date), |_, held| *held == booking_id);
    }

    pub(super) fn drop_token(&self, token: Option<Ulid>) {
        if let Some(t) = token {
            self.token_of.remove(&t);
        }
    }

    /// Remove every trace of a booking row (slot deletion cleanup).
    fn forget_booking(&self, b: &Booking) {
        self.slot_of.remove(&b.id);
        self.drop_token(b.token);
        self.release_day(b.booker, b.date, b.id);
    }
}

pub struct Engine {
    pub slots: DashMap<Ulid, SharedSlotState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) outbox: Outbox,
    pub(super) index: BookingIndex,
}

/// Apply a slot-local event directly to a SlotState (no locking — caller holds the lock).
/// `BookingRescheduled` touches two slots and goes through `apply_reschedule` instead.
fn apply_to_slot(rs: &mut SlotState, event: &Event, index: &BookingIndex) {
    match event {
        Event::BookingAdmitted {
            id,
            slot_id,
            booker,
            date,
            token,
            note,
            via_staff,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                booker: *booker,
                date: *date,
                status: BookingStatus::Approved,
                token: *token,
                note: note.clone(),
                via_staff: *via_staff,
            });
            index.slot_of.insert(*id, *slot_id);
            if let Some(t) = token {
                index.token_of.insert(*t, *id);
            }
            index.day_claims.insert((*booker, *date), *id);
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                let token = b.token.take();
                let (booker, date, bid) = (b.booker, b.date, b.id);
                index.drop_token(token);
                index.release_day(booker, date, bid);
            }
        }
        Event::OutcomeRecorded { id, outcome, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = BookingStatus::from(*outcome);
                // The appointment is closed; the day claim stays (non-cancelled).
                let token = b.token.take();
                index.drop_token(token);
            }
        }
        Event::SlotUpdated { name, starts_at, ends_at, capacity, .. } => {
            rs.name = name.clone();
            rs.starts_at = *starts_at;
            rs.ends_at = *ends_at;
            rs.capacity = *capacity;
        }
        // SlotCreated/Deleted are handled at the DashMap level; reschedules
        // are applied with both slot guards held.
        Event::SlotCreated { .. } | Event::SlotDeleted { .. } | Event::BookingRescheduled { .. } => {}
    }
}

/// Move a booking between slot states (or within one when `dst` is None),
/// rotating its token and day claim.
fn apply_reschedule(
    src: &mut SlotState,
    dst: Option<&mut SlotState>,
    to_slot: Ulid,
    id: Ulid,
    date: NaiveDate,
    token: Ulid,
    index: &BookingIndex,
) {
    let Some(mut booking) = src.remove_booking(id) else {
        return;
    };
    index.drop_token(booking.token);
    index.release_day(booking.booker, booking.date, booking.id);

    booking.date = date;
    booking.token = Some(token);

    index.token_of.insert(token, id);
    index.day_claims.insert((booking.booker, date), id);
    index.slot_of.insert(id, to_slot);

    match dst {
        Some(dst) => dst.insert_booking(booking),
        None => src.insert_booking(booking),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, outbox: Outbox) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            wal_tx,
            notify,
            outbox,
            index: BookingIndex::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::SlotCreated { id, name, starts_at, ends_at, capacity } => {
                    let rs = SlotState::new(*id, name.clone(), *starts_at, *ends_at, *capacity);
                    engine.slots.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::SlotDeleted { id } => {
                    if let Some(entry) = engine.slots.get(id) {
                        let rs = entry.try_read().expect("replay: uncontended read");
                        for b in &rs.bookings {
                            engine.index.forget_booking(b);
                        }
                    }
                    engine.slots.remove(id);
                }
                Event::BookingRescheduled { id, from_slot, to_slot, date, token } => {
                    if from_slot == to_slot {
                        if let Some(entry) = engine.slots.get(from_slot) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_reschedule(&mut guard, None, *to_slot, *id, *date, *token, &engine.index);
                        }
                    } else if let Some(src_entry) = engine.slots.get(from_slot)
                        && let Some(dst_entry) = engine.slots.get(to_slot)
                    {
                        let src_arc = src_entry.clone();
                        let dst_arc = dst_entry.clone();
                        let mut src = src_arc.try_write().expect("replay: uncontended write");
                        let mut dst = dst_arc.try_write().expect("replay: uncontended write");
                        apply_reschedule(&mut src, Some(&mut dst), *to_slot, *id, *date, *token, &engine.index);
                    }
                }
                other => {
                    if let Some(slot_id) = event_slot_id(other)
                        && let Some(entry) = engine.slots.get(&slot_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_slot(&mut guard, other, &engine.index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.index.slot_of.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_for_token(&self, token: &Ulid) -> Option<Ulid> {
        self.index.token_of.get(token).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        slot_id: Ulid,
        rs: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_slot(rs, event, &self.index);
        self.notify.send(slot_id, event);
        Ok(())
    }

    /// Lookup booking → slot, get slot, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let slot_id = self
            .slot_of_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = rs.write_owned().await;
        Ok((slot_id, guard))
    }
}

/// Extract the owning slot id from a slot-local event.
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingAdmitted { slot_id, .. }
        | Event::BookingCancelled { slot_id, .. }
        | Event::OutcomeRecorded { slot_id, .. } => Some(*slot_id),
        Event::SlotUpdated { id, .. } => Some(*id),
        Event::SlotCreated { .. } | Event::SlotDeleted { .. } | Event::BookingRescheduled { .. } => None,
    }
}
