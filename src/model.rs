use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only wall-clock type.
pub type Ms = i64;

/// Minutes since midnight — the only time-of-day type (minute resolution).
pub type Minute = i32;

/// Money in integer cents.
pub type Cents = i64;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_duration(start: Minute, duration_min: u32) -> Self {
        Self::new(start, start + duration_min as Minute)
    }

    pub fn duration_min(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Parse "HH:MM" into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let (h, m) = s.split_once(':')?;
    let h: Minute = h.parse().ok()?;
    let m: Minute = m.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// Format minutes since midnight as "HH:MM".
pub fn format_hhmm(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

// ── Booking ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Waiting for the worker to accept.
    Pending,
    /// Worker accepted; the slot is reserved.
    Confirmed,
    /// Worker traveling to the job site.
    OnTheWay,
    /// Worker on site, job running.
    InProgress,
    /// Job done, awaiting payment.
    WorkFinished,
    /// Payment received.
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected
        )
    }

    /// Active bookings occupy their interval on the worker's schedule.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::OnTheWay => "on_the_way",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::WorkFinished => "work_finished",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
}

impl PaymentMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
        }
    }
}

/// A scheduled service engagement between a customer and a worker.
///
/// Mutated only through engine transitions; never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub worker_id: Ulid,
    pub service_type: String,
    pub job_description: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Minute,
    /// Minutes; the engine substitutes its configured default when unset.
    pub estimated_duration: Option<u32>,
    pub status: BookingStatus,
    pub estimated_cost: Option<Cents>,
    pub final_cost: Option<Cents>,
    pub tip: Option<Cents>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub paid_at: Option<Ms>,
    pub created_at: Ms,
    pub accepted_at: Option<Ms>,
    pub rejected_at: Option<Ms>,
    pub rejection_reason: Option<String>,
    pub cancelled_at: Option<Ms>,
    pub cancelled_by: Option<Ulid>,
    pub cancellation_reason: Option<String>,
    pub work_finished_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub worker_notes: Option<String>,
    pub completion_photos: Vec<String>,
}

impl Booking {
    pub fn is_party(&self, user_id: Ulid) -> bool {
        self.customer_id == user_id || self.worker_id == user_id
    }

    /// The party that did not act, given the acting party.
    pub fn counterparty(&self, acting_user: Ulid) -> Ulid {
        if acting_user == self.customer_id {
            self.worker_id
        } else {
            self.customer_id
        }
    }

    /// Amount a payment or invoice is based on.
    pub fn billable_amount(&self) -> Cents {
        self.final_cost.or(self.estimated_cost).unwrap_or(0)
    }
}

/// Fields a customer supplies when requesting a booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub worker_id: Ulid,
    pub service_type: String,
    pub job_description: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Minute,
    pub estimated_duration: Option<u32>,
    pub estimated_cost: Option<Cents>,
}

// ── Worker schedule ──────────────────────────────────────────────

/// Why a slot occupies the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Manual unavailability, owned by the worker directly.
    Blocked { note: Option<String> },
    /// Derived from a booking; lifetime owned by that booking.
    Booked { booking_id: Ulid },
}

/// An interval during which a worker is unavailable for new bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub kind: SlotKind,
}

/// A non-terminal booking's claim on the schedule, tracked independently of
/// slot rows so overlap checks hold even before a Booked slot exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveBooking {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

/// Per-worker schedule: slots plus the intervals of active bookings.
/// The contended resource — always mutated under its own write lock.
#[derive(Debug, Clone)]
pub struct WorkerSchedule {
    pub worker_id: Ulid,
    /// All slots, sorted by `(date, span.start)`.
    pub slots: Vec<Slot>,
    pub active: Vec<ActiveBooking>,
}

impl WorkerSchedule {
    pub fn new(worker_id: Ulid) -> Self {
        Self {
            worker_id,
            slots: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Insert a slot maintaining sort order by `(date, span.start)`.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&(slot.date, slot.span.start), |s| (s.date, s.span.start))
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot(&self, id: Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Delete the Booked slot referencing this booking. Idempotent.
    pub fn release_for_booking(&mut self, booking_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(
            |s| matches!(s.kind, SlotKind::Booked { booking_id: b } if b == booking_id),
        )?;
        Some(self.slots.remove(pos))
    }

    /// Slots on `date` whose span overlaps the query window.
    /// Binary search skips everything outside `(date, query.end)`.
    pub fn overlapping(&self, date: NaiveDate, query: Span) -> impl Iterator<Item = &Slot> {
        let lo = self.slots.partition_point(|s| s.date < date);
        let hi = self
            .slots
            .partition_point(|s| (s.date, s.span.start) < (date, query.end));
        self.slots[lo..hi]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    pub fn add_active(&mut self, entry: ActiveBooking) {
        self.active.push(entry);
    }

    pub fn remove_active(&mut self, booking_id: Ulid) {
        self.active.retain(|a| a.booking_id != booking_id);
    }

    pub fn active_overlapping(
        &self,
        date: NaiveDate,
        query: Span,
    ) -> impl Iterator<Item = &ActiveBooking> {
        self.active
            .iter()
            .filter(move |a| a.date == date && a.span.overlaps(&query))
    }
}

// ── Journal events ───────────────────────────────────────────────

/// Flat per-operation records; this is the journal entry format.
/// Replay is deterministic: timestamps ride in the event, never the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        span: Span,
        at: Ms,
    },
    BookingRejected {
        id: Ulid,
        at: Ms,
        reason: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        by: Ulid,
        at: Ms,
        reason: Option<String>,
    },
    WorkerEnRoute {
        id: Ulid,
        at: Ms,
    },
    WorkStarted {
        id: Ulid,
        at: Ms,
    },
    WorkFinished {
        id: Ulid,
        at: Ms,
        final_cost: Option<Cents>,
        completion_photos: Vec<String>,
        worker_notes: Option<String>,
    },
    PaymentRecorded {
        id: Ulid,
        at: Ms,
        method: PaymentMethod,
        tip: Option<Cents>,
    },
    SlotBlocked {
        id: Ulid,
        worker_id: Ulid,
        date: NaiveDate,
        span: Span,
        note: Option<String>,
    },
    SlotUnblocked {
        id: Ulid,
        worker_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub end: Minute,
    pub note: Option<String>,
}

/// One active booking row in a worker's schedule view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledBooking {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub duration_min: u32,
    pub status: BookingStatus,
    pub service_type: String,
}

/// Blocked slots plus active bookings for a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleView {
    pub blocked: Vec<SlotInfo>,
    pub bookings: Vec<ScheduledBooking>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct WorkerStats {
    pub by_status: Vec<(BookingStatus, u64)>,
    pub completed: u64,
    /// Final cost plus tip over completed bookings.
    pub total_earnings: Cents,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, day).unwrap()
    }

    fn blocked(date: NaiveDate, start: Minute, end: Minute) -> Slot {
        Slot {
            id: Ulid::new(),
            date,
            span: Span::new(start, end),
            kind: SlotKind::Blocked { note: None },
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(540, 600);
        assert_eq!(s.duration_min(), 60);
        assert_eq!(Span::from_duration(540, 60), s);
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(540, 600);
        let b = Span::new(570, 630);
        let c = Span::new(600, 660);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not overlapping
    }

    #[test]
    fn hhmm_roundtrip() {
        assert_eq!(parse_hhmm("09:00"), Some(540));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("9"), None);
        assert_eq!(format_hhmm(540), "09:00");
        assert_eq!(format_hhmm(1439), "23:59");
    }

    #[test]
    fn status_terminality() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::WorkFinished.is_active());
        assert!(BookingStatus::Pending.is_active());
    }

    #[test]
    fn slot_ordering_across_dates() {
        let mut ws = WorkerSchedule::new(Ulid::new());
        ws.insert_slot(blocked(d(11), 540, 600));
        ws.insert_slot(blocked(d(10), 900, 960));
        ws.insert_slot(blocked(d(10), 540, 600));
        assert_eq!(ws.slots[0].date, d(10));
        assert_eq!(ws.slots[0].span.start, 540);
        assert_eq!(ws.slots[1].span.start, 900);
        assert_eq!(ws.slots[2].date, d(11));
    }

    #[test]
    fn overlapping_scoped_to_date() {
        let mut ws = WorkerSchedule::new(Ulid::new());
        ws.insert_slot(blocked(d(10), 540, 600));
        ws.insert_slot(blocked(d(11), 540, 600));
        let hits: Vec<_> = ws.overlapping(d(10), Span::new(0, MINUTES_PER_DAY)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].date, d(10));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut ws = WorkerSchedule::new(Ulid::new());
        ws.insert_slot(blocked(d(10), 540, 600));
        let hits: Vec<_> = ws.overlapping(d(10), Span::new(600, 660)).collect();
        assert!(hits.is_empty());
        let hits: Vec<_> = ws.overlapping(d(10), Span::new(480, 540)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn release_for_booking_idempotent() {
        let mut ws = WorkerSchedule::new(Ulid::new());
        let bid = Ulid::new();
        ws.insert_slot(Slot {
            id: Ulid::new(),
            date: d(10),
            span: Span::new(540, 600),
            kind: SlotKind::Booked { booking_id: bid },
        });
        assert!(ws.release_for_booking(bid).is_some());
        assert!(ws.release_for_booking(bid).is_none());
        assert!(ws.slots.is_empty());
    }

    #[test]
    fn active_overlap_scoped_to_date() {
        let mut ws = WorkerSchedule::new(Ulid::new());
        let bid = Ulid::new();
        ws.add_active(ActiveBooking {
            booking_id: bid,
            date: d(10),
            span: Span::new(540, 600),
        });
        assert_eq!(ws.active_overlapping(d(10), Span::new(570, 630)).count(), 1);
        assert_eq!(ws.active_overlapping(d(11), Span::new(570, 630)).count(), 0);
        ws.remove_active(bid);
        assert_eq!(ws.active_overlapping(d(10), Span::new(570, 630)).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SlotBlocked {
            id: Ulid::new(),
            worker_id: Ulid::new(),
            date: d(10),
            span: Span::new(540, 720),
            note: Some("dentist".into()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
