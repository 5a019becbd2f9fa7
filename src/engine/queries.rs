use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Which side of a booking a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    Customer,
    Worker,
}

const ALL_STATUSES: [BookingStatus; 8] = [
    BookingStatus::Pending,
    BookingStatus::Confirmed,
    BookingStatus::OnTheWay,
    BookingStatus::InProgress,
    BookingStatus::WorkFinished,
    BookingStatus::Completed,
    BookingStatus::Cancelled,
    BookingStatus::Rejected,
];

impl Engine {
    /// Fetch a booking; only its two parties may see it. Details of the
    /// parties themselves are the caller's read-side join.
    pub fn get_booking(&self, id: Ulid, acting_user: Ulid) -> Result<Booking, EngineError> {
        let booking = self.booking_or_not_found(id)?;
        if !booking.is_party(acting_user) {
            return Err(EngineError::Forbidden("not a party to this booking"));
        }
        Ok(booking)
    }

    /// All bookings where the user plays the given role, newest first,
    /// optionally filtered by status.
    pub fn bookings_for(
        &self,
        user_id: Ulid,
        role: PartyRole,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let mut out = self.bookings.collect(|b| {
            let party_match = match role {
                PartyRole::Customer => b.customer_id == user_id,
                PartyRole::Worker => b.worker_id == user_id,
            };
            party_match && status.is_none_or(|s| b.status == s)
        });
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn customer_bookings(
        &self,
        customer_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        self.bookings_for(customer_id, PartyRole::Customer, status)
    }

    pub fn worker_bookings(&self, worker_id: Ulid, status: Option<BookingStatus>) -> Vec<Booking> {
        self.bookings_for(worker_id, PartyRole::Worker, status)
    }

    /// Per-status counts and completed earnings for a worker.
    pub fn worker_stats(&self, worker_id: Ulid) -> WorkerStats {
        let bookings = self.bookings.collect(|b| b.worker_id == worker_id);
        let mut stats = WorkerStats::default();
        for status in ALL_STATUSES {
            let count = bookings.iter().filter(|b| b.status == status).count() as u64;
            if count > 0 {
                stats.by_status.push((status, count));
            }
        }
        for b in &bookings {
            if b.status == BookingStatus::Completed {
                stats.completed += 1;
                stats.total_earnings += b.billable_amount() + b.tip.unwrap_or(0);
            }
        }
        stats
    }

    /// Blocked slots and active bookings on a worker's schedule for a date
    /// range (inclusive). Rows come back sorted by date and start time.
    pub async fn worker_schedule(
        &self,
        worker_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ScheduleView, EngineError> {
        if from > to {
            return Err(EngineError::InvalidState("range start must not follow end"));
        }
        if (to - from).num_days() > MAX_SCHEDULE_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("schedule query window too wide"));
        }

        let Some(sched) = self.schedules.get(&worker_id) else {
            return Ok(ScheduleView {
                blocked: Vec::new(),
                bookings: Vec::new(),
            });
        };
        let guard = self.read_schedule(&sched).await?;

        let blocked = guard
            .slots
            .iter()
            .filter(|s| s.date >= from && s.date <= to)
            .filter_map(|s| match &s.kind {
                SlotKind::Blocked { note } => Some(SlotInfo {
                    id: s.id,
                    date: s.date,
                    start: s.span.start,
                    end: s.span.end,
                    note: note.clone(),
                }),
                SlotKind::Booked { .. } => None,
            })
            .collect();

        let mut bookings: Vec<ScheduledBooking> = guard
            .active
            .iter()
            .filter(|a| a.date >= from && a.date <= to)
            .filter_map(|a| {
                let b = self.bookings.get(&a.booking_id)?;
                Some(ScheduledBooking {
                    booking_id: a.booking_id,
                    date: a.date,
                    start: a.span.start,
                    duration_min: a.span.duration_min() as u32,
                    status: b.status,
                    service_type: b.service_type,
                })
            })
            .collect();
        bookings.sort_by_key(|b| (b.date, b.start));

        Ok(ScheduleView { blocked, bookings })
    }
}
