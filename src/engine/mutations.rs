use serde_json::json;
use ulid::Ulid;

use crate::collab::NotificationKind;
use crate::limits::*;
use crate::model::*;

use super::availability::{check_reservable, validate_day_span};
use super::{Engine, EngineError};

fn validate_request(req: &NewBooking) -> Result<(), EngineError> {
    if req.service_type.is_empty() {
        return Err(EngineError::InvalidState("service type required"));
    }
    if req.service_type.len() > MAX_SERVICE_TYPE_LEN {
        return Err(EngineError::LimitExceeded("service type too long"));
    }
    if req.job_description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("job description too long"));
    }
    if req.estimated_duration == Some(0) {
        return Err(EngineError::InvalidState("duration must be positive"));
    }
    if req.estimated_cost.is_some_and(|c| c < 0) {
        return Err(EngineError::InvalidState("cost cannot be negative"));
    }
    Ok(())
}

impl Engine {
    /// Request a new booking. Starts in Pending; no slot is reserved until
    /// the worker confirms. The availability check here is advisory — the
    /// authoritative one reruns at confirmation time.
    pub async fn create_booking(
        &self,
        customer_id: Ulid,
        req: NewBooking,
    ) -> Result<Booking, EngineError> {
        validate_request(&req)?;
        if customer_id == req.worker_id {
            return Err(EngineError::InvalidState(
                "customer and worker must be distinct parties",
            ));
        }
        let duration = self.effective_duration(req.estimated_duration);
        let span = validate_day_span(
            req.scheduled_time,
            req.scheduled_time + duration as Minute,
        )?;

        let sched = self.schedules.get_or_create(req.worker_id);
        let guard = self.write_schedule(&sched).await?;
        if guard.active.len() >= MAX_ACTIVE_BOOKINGS_PER_WORKER {
            return Err(EngineError::LimitExceeded("too many open bookings for worker"));
        }
        // Advisory only: the authoritative guard reruns when the worker
        // confirms, so a stale answer here never corrupts the schedule.
        if let Err(e) = check_reservable(&guard, req.scheduled_date, span) {
            tracing::debug!(
                worker = %req.worker_id,
                date = %req.scheduled_date,
                "requested slot currently unavailable ({e}); accepting pending request"
            );
        }

        let booking = Booking {
            id: Ulid::new(),
            customer_id,
            worker_id: req.worker_id,
            service_type: req.service_type,
            job_description: req.job_description,
            scheduled_date: req.scheduled_date,
            scheduled_time: req.scheduled_time,
            estimated_duration: req.estimated_duration,
            status: BookingStatus::Pending,
            estimated_cost: req.estimated_cost,
            final_cost: None,
            tip: None,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            paid_at: None,
            created_at: self.clock.now_ms(),
            accepted_at: None,
            rejected_at: None,
            rejection_reason: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            work_finished_at: None,
            completed_at: None,
            worker_notes: None,
            completion_photos: Vec::new(),
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        let guard = self.persist_and_apply(guard, event).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            booking = %booking.id,
            worker = %booking.worker_id,
            date = %booking.scheduled_date,
            "booking created at {}",
            format_hhmm(booking.scheduled_time)
        );

        self.dispatch(
            booking.worker_id,
            NotificationKind::NewBooking,
            json!({
                "booking_id": booking.id.to_string(),
                "customer_id": customer_id.to_string(),
                "service_type": booking.service_type,
                "date": booking.scheduled_date.to_string(),
                "time": format_hhmm(booking.scheduled_time),
            }),
        )
        .await;

        Ok(booking)
    }
}
