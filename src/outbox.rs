use chrono::NaiveDate;
use tokio::sync::mpsc;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::OUTBOX_CAPACITY;

/// A queued notification for the email/push delivery collaborator.
/// Carries everything the template needs, including the reschedule token
/// that goes into the self-service links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Confirmed {
        booking_id: Ulid,
        slot_name: String,
        date: NaiveDate,
        token: Ulid,
    },
    Moved {
        booking_id: Ulid,
        slot_name: String,
        date: NaiveDate,
        token: Ulid,
    },
    Cancelled {
        booking_id: Ulid,
        slot_name: String,
        date: NaiveDate,
    },
}

/// Post-commit notification queue. Sends never block and never fail the
/// booking that triggered them: a full or closed queue drops the notice
/// and bumps a counter.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Notice>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn send(&self, notice: Notice) {
        if let Err(e) = self.tx.try_send(notice) {
            metrics::counter!(crate::observability::NOTICES_DROPPED_TOTAL).increment(1);
            debug!("outbox drop: {e}");
        }
    }
}

/// Background task draining the outbox toward the delivery collaborator.
/// The transport lives outside this service; delivery here is a structured
/// log line the mail relay tails.
pub async fn run_outbox(mut rx: mpsc::Receiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        metrics::counter!(crate::observability::NOTICES_SENT_TOTAL).increment(1);
        match &notice {
            Notice::Confirmed { booking_id, slot_name, date, token } => {
                info!(%booking_id, slot_name, %date, %token, "notice: booking confirmed");
            }
            Notice::Moved { booking_id, slot_name, date, token } => {
                info!(%booking_id, slot_name, %date, %token, "notice: booking moved");
            }
            Notice::Cancelled { booking_id, slot_name, date } => {
                info!(%booking_id, slot_name, %date, "notice: booking cancelled");
            }
        }
    }
}
