mod availability;
mod error;
mod mutations;
mod queries;
mod state_machine;
mod store;

pub use availability::{FreeSlots, SlotCheck};
pub use error::EngineError;
pub use queries::PartyRole;
pub use state_machine::TransitionArgs;
pub use store::{BookingStore, ScheduleStore, SharedSchedule};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::clock::Clock;
use crate::collab::{InvoiceIssuer, NotificationDispatcher, NotificationKind};
use crate::config::EngineConfig;
use crate::journal::Journal;
use crate::model::*;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
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

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut journal, &mut batch);
                            handle_non_append(&mut journal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut journal, &mut batch);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

fn flush_and_respond(
    journal: &mut Journal,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE)
        .record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    journal: &mut Journal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = journal.flush_sync().err();
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

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!(),
    }
}

/// Booking lifecycle state machine and availability engine in one unit:
/// every status write and its slot side effect commit together under the
/// owning worker's schedule lock.
pub struct Engine {
    pub(super) bookings: Arc<BookingStore>,
    pub(super) schedules: ScheduleStore,
    journal_tx: mpsc::Sender<JournalCommand>,
    pub(super) dispatcher: Arc<dyn NotificationDispatcher>,
    pub(super) invoices: Arc<dyn InvoiceIssuer>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
}

/// Apply an event to the stores (no locking — caller holds the schedule lock).
/// Replay-safe: every input rides in the event, never the clock.
fn apply_event(
    bookings: &BookingStore,
    sched: &mut WorkerSchedule,
    event: &Event,
    default_duration_min: u32,
) {
    match event {
        Event::BookingCreated { booking } => {
            if booking.status.is_active() {
                let duration = booking.estimated_duration.unwrap_or(default_duration_min);
                sched.add_active(ActiveBooking {
                    booking_id: booking.id,
                    date: booking.scheduled_date,
                    span: Span::from_duration(booking.scheduled_time, duration),
                });
            }
            bookings.insert(booking.clone());
        }
        Event::BookingConfirmed {
            id,
            slot_id,
            date,
            span,
            at,
        } => {
            // Out of Pending only: a compacted journal replays this event for
            // bookings that already carry a later status.
            bookings.update(id, |b| {
                if b.status == BookingStatus::Pending {
                    b.status = BookingStatus::Confirmed;
                    b.accepted_at = Some(*at);
                }
            });
            sched.insert_slot(Slot {
                id: *slot_id,
                date: *date,
                span: *span,
                kind: SlotKind::Booked { booking_id: *id },
            });
        }
        Event::BookingRejected { id, at, reason } => {
            bookings.update(id, |b| {
                b.status = BookingStatus::Rejected;
                b.rejected_at = Some(*at);
                b.rejection_reason = reason.clone();
            });
            sched.remove_active(*id);
        }
        Event::BookingCancelled { id, by, at, reason } => {
            bookings.update(id, |b| {
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(*at);
                b.cancelled_by = Some(*by);
                b.cancellation_reason = reason.clone();
            });
            sched.release_for_booking(*id);
            sched.remove_active(*id);
        }
        Event::WorkerEnRoute { id, .. } => {
            bookings.update(id, |b| b.status = BookingStatus::OnTheWay);
        }
        Event::WorkStarted { id, .. } => {
            bookings.update(id, |b| b.status = BookingStatus::InProgress);
        }
        Event::WorkFinished {
            id,
            at,
            final_cost,
            completion_photos,
            worker_notes,
        } => {
            bookings.update(id, |b| {
                b.status = BookingStatus::WorkFinished;
                b.work_finished_at = Some(*at);
                if final_cost.is_some() {
                    b.final_cost = *final_cost;
                }
                if !completion_photos.is_empty() {
                    b.completion_photos = completion_photos.clone();
                }
                if worker_notes.is_some() {
                    b.worker_notes = worker_notes.clone();
                }
            });
        }
        Event::PaymentRecorded { id, at, method, tip } => {
            bookings.update(id, |b| {
                b.status = BookingStatus::Completed;
                b.payment_status = PaymentStatus::Paid;
                b.payment_method = Some(*method);
                if tip.is_some() {
                    b.tip = *tip;
                }
                b.paid_at = Some(*at);
                b.completed_at = Some(*at);
            });
            sched.remove_active(*id);
        }
        Event::SlotBlocked {
            id,
            date,
            span,
            note,
            ..
        } => {
            sched.insert_slot(Slot {
                id: *id,
                date: *date,
                span: *span,
                kind: SlotKind::Blocked { note: note.clone() },
            });
        }
        Event::SlotUnblocked { id, .. } => {
            sched.remove_slot(*id);
        }
    }
}

/// Write an event through the background group-commit writer, bounded by
/// the journal timeout.
async fn append_via(
    journal_tx: &mpsc::Sender<JournalCommand>,
    journal_timeout: std::time::Duration,
    event: &Event,
) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    journal_tx
        .send(JournalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Unavailable("journal writer shut down"))?;
    let appended = tokio::time::timeout(journal_timeout, rx)
        .await
        .map_err(|_| EngineError::Timeout("journal append"))?
        .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?;
    appended.map_err(|e| EngineError::JournalError(e.to_string()))
}

/// The worker whose schedule an event touches.
fn event_worker_id(bookings: &BookingStore, event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking } => Some(booking.worker_id),
        Event::SlotBlocked { worker_id, .. } | Event::SlotUnblocked { worker_id, .. } => {
            Some(*worker_id)
        }
        Event::BookingConfirmed { id, .. }
        | Event::BookingRejected { id, .. }
        | Event::BookingCancelled { id, .. }
        | Event::WorkerEnRoute { id, .. }
        | Event::WorkStarted { id, .. }
        | Event::WorkFinished { id, .. }
        | Event::PaymentRecorded { id, .. } => bookings.get(id).map(|b| b.worker_id),
    }
}

impl Engine {
    pub fn new(
        journal_path: PathBuf,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        invoices: Arc<dyn InvoiceIssuer>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            bookings: Arc::new(BookingStore::new()),
            schedules: ScheduleStore::new(),
            journal_tx,
            dispatcher,
            invoices,
            clock,
            config,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context.
        for event in &events {
            let Some(worker_id) = event_worker_id(&engine.bookings, event) else {
                tracing::warn!("replay: dropping event for unknown booking");
                continue;
            };
            let sched = engine.schedules.get_or_create(worker_id);
            let mut guard = sched.try_write().expect("replay: uncontended write");
            apply_event(
                &engine.bookings,
                &mut guard,
                event,
                engine.config.default_duration_min,
            );
        }

        Ok(engine)
    }

    /// Journal-append + apply in one call, under the caller's schedule lock.
    /// A failed append leaves both stores untouched.
    ///
    /// Runs detached from the caller: a request dropped mid-await (client
    /// disconnect) can no longer split the durable write from the in-memory
    /// apply — either both happen or neither does. The guard travels into
    /// the task and comes back on success.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<WorkerSchedule>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<WorkerSchedule>, EngineError> {
        let journal_tx = self.journal_tx.clone();
        let journal_timeout = self.config.journal_timeout;
        let bookings = self.bookings.clone();
        let default_duration_min = self.config.default_duration_min;

        let handle = tokio::spawn(async move {
            append_via(&journal_tx, journal_timeout, &event).await?;
            apply_event(&bookings, &mut guard, &event, default_duration_min);
            Ok::<_, EngineError>(guard)
        });
        handle
            .await
            .map_err(|_| EngineError::Unavailable("state apply task failed"))?
    }

    /// Acquire a schedule write lock within the configured bound.
    pub(super) async fn write_schedule(
        &self,
        sched: &SharedSchedule,
    ) -> Result<OwnedRwLockWriteGuard<WorkerSchedule>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout, sched.clone().write_owned())
            .await
            .map_err(|_| EngineError::Timeout("worker schedule lock"))
    }

    /// Acquire a schedule read lock; read-only checks retry a bounded number
    /// of times before surfacing Timeout.
    pub(super) async fn read_schedule(
        &self,
        sched: &SharedSchedule,
    ) -> Result<OwnedRwLockReadGuard<WorkerSchedule>, EngineError> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.config.lock_timeout, sched.clone().read_owned()).await
            {
                Ok(guard) => return Ok(guard),
                Err(_) if attempt < self.config.read_retries => {
                    attempt += 1;
                    tracing::debug!("schedule read lock timed out, retry {attempt}");
                }
                Err(_) => return Err(EngineError::Timeout("worker schedule lock")),
            }
        }
    }

    /// Booking lookup that distinguishes absence from access.
    pub(super) fn booking_or_not_found(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.bookings.get(&id).ok_or(EngineError::NotFound(id))
    }

    /// The one place the 60-minute duration default applies.
    pub(super) fn effective_duration(&self, estimated: Option<u32>) -> u32 {
        estimated.unwrap_or(self.config.default_duration_min)
    }

    pub(super) fn booking_span(&self, booking: &Booking) -> Span {
        Span::from_duration(
            booking.scheduled_time,
            self.effective_duration(booking.estimated_duration),
        )
    }

    pub(super) async fn dispatch(
        &self,
        user_id: Ulid,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) {
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL).increment(1);
        self.dispatcher.notify(user_id, kind, payload).await;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rewrite the journal with only the events needed to recreate the
    /// current state: every booking as it stands, then the surviving slots.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for booking in self.bookings.collect(|_| true) {
            events.push(Event::BookingCreated { booking });
        }

        for worker_id in self.schedules.worker_ids() {
            let Some(sched) = self.schedules.get(&worker_id) else {
                continue;
            };
            let guard = sched.read().await;
            for slot in &guard.slots {
                match &slot.kind {
                    SlotKind::Blocked { note } => events.push(Event::SlotBlocked {
                        id: slot.id,
                        worker_id,
                        date: slot.date,
                        span: slot.span,
                        note: note.clone(),
                    }),
                    SlotKind::Booked { booking_id } => {
                        let at = self
                            .bookings
                            .get(booking_id)
                            .map(|b| b.accepted_at.unwrap_or(b.created_at))
                            .unwrap_or(0);
                        events.push(Event::BookingConfirmed {
                            id: *booking_id,
                            slot_id: slot.id,
                            date: slot.date,
                            span: slot.span,
                            at,
                        });
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("journal writer shut down"))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
