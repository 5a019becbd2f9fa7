use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Reject a reservation that overlaps any existing slot (Blocked or Booked)
/// on the worker's schedule. This is the authoritative double-booking guard;
/// it runs under the schedule write lock, in the same atomic unit as the
/// status write. Competing Pending requests are not conflicts here — the
/// worker confirms one of them, and the others fail on the slot it leaves.
pub(super) fn check_reservable(
    sched: &WorkerSchedule,
    date: NaiveDate,
    span: Span,
) -> Result<(), EngineError> {
    match sched.overlapping(date, span).next() {
        Some(slot) => Err(EngineError::SlotConflict(slot.id)),
        None => Ok(()),
    }
}

pub(super) fn validate_day_span(start: Minute, end: Minute) -> Result<Span, EngineError> {
    if start < 0 || end > MINUTES_PER_DAY {
        return Err(EngineError::LimitExceeded("time outside the day"));
    }
    if start >= end {
        return Err(EngineError::InvalidState("interval start must precede end"));
    }
    Ok(Span::new(start, end))
}

/// Yes/no answer for one candidate interval, with the reason when no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCheck {
    pub available: bool,
    pub reason: Option<&'static str>,
}

impl SlotCheck {
    fn free() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    fn taken(reason: &'static str) -> Self {
        Self {
            available: false,
            reason: Some(reason),
        }
    }
}

/// Lazy, finite, restartable sequence of free candidate start times.
/// Works off a snapshot of the schedule taken at creation.
#[derive(Debug, Clone)]
pub struct FreeSlots {
    busy: Arc<[Span]>,
    origin: Minute,
    cursor: Minute,
    end: Minute,
    step: Minute,
}

impl FreeSlots {
    fn new(busy: Vec<Span>, start: Minute, end: Minute, step: Minute) -> Self {
        Self {
            busy: busy.into(),
            origin: start,
            cursor: start,
            end,
            step,
        }
    }

    /// A fresh iterator over the same snapshot, from the beginning.
    pub fn restart(&self) -> Self {
        let mut fresh = self.clone();
        fresh.cursor = self.origin;
        fresh
    }
}

impl Iterator for FreeSlots {
    type Item = Minute;

    fn next(&mut self) -> Option<Minute> {
        // Whole interval must fit before the working-hours boundary;
        // no partial slots.
        while self.cursor + self.step <= self.end {
            let candidate = Span::new(self.cursor, self.cursor + self.step);
            self.cursor += self.step;
            if !self.busy.iter().any(|b| b.overlaps(&candidate)) {
                return Some(candidate.start);
            }
        }
        None
    }
}

impl Engine {
    /// Block a time slot for manual unavailability (personal time, breaks).
    ///
    /// The conflict guard is an idempotency check on the exact
    /// `[date, start, end)` tuple, not a general overlap check — workers
    /// may stack non-identical blocks.
    pub async fn block_slot(
        &self,
        worker_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
        note: Option<String>,
    ) -> Result<Slot, EngineError> {
        let span = validate_day_span(start, end)?;
        if let Some(n) = &note
            && n.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("note too long"));
        }

        let sched = self.schedules.get_or_create(worker_id);
        let guard = self.write_schedule(&sched).await?;
        if guard.slots.len() >= MAX_SLOTS_PER_WORKER {
            return Err(EngineError::LimitExceeded("too many slots on schedule"));
        }
        if let Some(existing) = guard
            .overlapping(date, span)
            .find(|s| s.span == span)
        {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotConflict(existing.id));
        }

        let slot_id = Ulid::new();
        let event = Event::SlotBlocked {
            id: slot_id,
            worker_id,
            date,
            span,
            note,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        let slot = guard.slot(slot_id).cloned().expect("slot just inserted");
        drop(guard);

        metrics::counter!(crate::observability::SLOTS_BLOCKED_TOTAL).increment(1);
        tracing::info!(worker = %worker_id, %date, "slot blocked [{}, {})",
            format_hhmm(span.start), format_hhmm(span.end));
        Ok(slot)
    }

    /// Remove a manual block. Booked slots can only be released through
    /// cancellation, never directly — they surface as NotFound here.
    pub async fn unblock_slot(&self, worker_id: Ulid, slot_id: Ulid) -> Result<(), EngineError> {
        let sched = self
            .schedules
            .get(&worker_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = self.write_schedule(&sched).await?;
        match guard.slot(slot_id) {
            Some(slot) if matches!(slot.kind, SlotKind::Blocked { .. }) => {}
            _ => return Err(EngineError::NotFound(slot_id)),
        }

        let event = Event::SlotUnblocked {
            id: slot_id,
            worker_id,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        drop(guard);

        tracing::info!(worker = %worker_id, slot = %slot_id, "slot unblocked");
        Ok(())
    }

    /// Is the worker free for this interval? Checks blocked and booked slots
    /// plus every active booking's interval, independent of whether a slot
    /// row exists yet.
    pub async fn is_available(
        &self,
        worker_id: Ulid,
        date: NaiveDate,
        start_time: Minute,
        duration_min: Option<u32>,
    ) -> Result<SlotCheck, EngineError> {
        let duration = self.effective_duration(duration_min);
        let span = validate_day_span(start_time, start_time + duration as Minute)?;

        let Some(sched) = self.schedules.get(&worker_id) else {
            return Ok(SlotCheck::free());
        };
        let guard = self.read_schedule(&sched).await?;

        if let Some(slot) = guard.overlapping(date, span).next() {
            return Ok(match slot.kind {
                SlotKind::Booked { .. } => SlotCheck::taken("this time slot is already booked"),
                SlotKind::Blocked { .. } => {
                    SlotCheck::taken("worker is not available at this time")
                }
            });
        }
        if guard.active_overlapping(date, span).next().is_some() {
            return Ok(SlotCheck::taken("worker has another booking at this time"));
        }
        Ok(SlotCheck::free())
    }

    /// Candidate start times within working hours for which the worker is
    /// free. The returned iterator is lazy and works off a snapshot; clone
    /// or `restart()` it to walk the same day again.
    pub async fn list_free_slots(
        &self,
        worker_id: Ulid,
        date: NaiveDate,
        working_hours_start: Minute,
        working_hours_end: Minute,
        slot_granularity_min: u32,
    ) -> Result<FreeSlots, EngineError> {
        if slot_granularity_min < MIN_SLOT_GRANULARITY_MIN {
            return Err(EngineError::LimitExceeded("slot granularity too fine"));
        }
        let window = validate_day_span(working_hours_start, working_hours_end)?;

        let busy = match self.schedules.get(&worker_id) {
            None => Vec::new(),
            Some(sched) => {
                let guard = self.read_schedule(&sched).await?;
                let mut busy: Vec<Span> = guard
                    .overlapping(date, window)
                    .map(|s| s.span)
                    .collect();
                busy.extend(guard.active_overlapping(date, window).map(|a| a.span));
                busy
            }
        };

        Ok(FreeSlots::new(
            busy,
            window.start,
            window.end,
            slot_granularity_min as Minute,
        ))
    }

    /// Free slots with the configured working hours and granularity.
    pub async fn list_free_slots_default(
        &self,
        worker_id: Ulid,
        date: NaiveDate,
    ) -> Result<FreeSlots, EngineError> {
        self.list_free_slots(
            worker_id,
            date,
            self.config.working_hours_start,
            self.config.working_hours_end,
            self.config.slot_granularity_min,
        )
        .await
    }
}
