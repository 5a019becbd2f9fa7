use serde_json::json;
use ulid::Ulid;

use crate::collab::NotificationKind;
use crate::limits::*;
use crate::model::*;

use super::availability::check_reservable;
use super::{Engine, EngineError};

/// Who may drive an edge. There are no customer-only edges: the customer's
/// one privileged operation (payment) has its own entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorRule {
    Worker,
    Either,
}

/// The legal transition graph as data. Completed is absent on purpose:
/// `process_payment` is its only entry point, and keeping it out of the
/// table means future edits here cannot reopen a payment-free shortcut.
const EDGES: &[(BookingStatus, BookingStatus, ActorRule)] = &[
    (BookingStatus::Pending, BookingStatus::Confirmed, ActorRule::Worker),
    (BookingStatus::Pending, BookingStatus::Rejected, ActorRule::Worker),
    (BookingStatus::Pending, BookingStatus::Cancelled, ActorRule::Either),
    (BookingStatus::Confirmed, BookingStatus::OnTheWay, ActorRule::Worker),
    (BookingStatus::Confirmed, BookingStatus::Cancelled, ActorRule::Either),
    (BookingStatus::OnTheWay, BookingStatus::InProgress, ActorRule::Worker),
    (BookingStatus::OnTheWay, BookingStatus::Cancelled, ActorRule::Either),
    (BookingStatus::InProgress, BookingStatus::WorkFinished, ActorRule::Worker),
    (BookingStatus::InProgress, BookingStatus::Cancelled, ActorRule::Either),
    (BookingStatus::WorkFinished, BookingStatus::Cancelled, ActorRule::Either),
];

fn edge_actor(from: BookingStatus, to: BookingStatus) -> Option<ActorRule> {
    EDGES
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, rule)| *rule)
}

/// Per-edge fields a transition may carry.
#[derive(Debug, Clone, Default)]
pub struct TransitionArgs {
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub final_cost: Option<Cents>,
    pub completion_photos: Vec<String>,
    pub worker_notes: Option<String>,
}

impl TransitionArgs {
    fn validate(&self) -> Result<(), EngineError> {
        for reason in [&self.rejection_reason, &self.cancellation_reason]
            .into_iter()
            .flatten()
        {
            if reason.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("reason too long"));
            }
        }
        if let Some(notes) = &self.worker_notes
            && notes.len() > MAX_WORKER_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("worker notes too long"));
        }
        if self.completion_photos.len() > MAX_PHOTOS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many completion photos"));
        }
        if self.completion_photos.iter().any(|p| p.len() > MAX_PHOTO_URL_LEN) {
            return Err(EngineError::LimitExceeded("photo url too long"));
        }
        Ok(())
    }
}

fn kind_for(target: BookingStatus) -> NotificationKind {
    match target {
        BookingStatus::Confirmed => NotificationKind::BookingAccepted,
        BookingStatus::Rejected => NotificationKind::BookingRejected,
        BookingStatus::Cancelled => NotificationKind::BookingCancelled,
        BookingStatus::OnTheWay => NotificationKind::WorkerOnTheWay,
        BookingStatus::InProgress => NotificationKind::JobStarted,
        BookingStatus::WorkFinished => NotificationKind::WorkFinished,
        BookingStatus::Completed => NotificationKind::JobCompleted,
        BookingStatus::Pending => NotificationKind::NewBooking,
    }
}

fn transition_payload(booking: &Booking, target: BookingStatus) -> serde_json::Value {
    let mut payload = json!({
        "booking_id": booking.id.to_string(),
        "status": target.label(),
        "service_type": booking.service_type,
    });
    match target {
        BookingStatus::Cancelled => {
            payload["cancelled_by"] =
                json!(booking.cancelled_by.map(|u| u.to_string()));
            payload["reason"] = json!(booking.cancellation_reason);
        }
        BookingStatus::Rejected => {
            payload["reason"] = json!(booking.rejection_reason);
        }
        BookingStatus::WorkFinished => {
            payload["amount"] = json!(booking.billable_amount());
        }
        _ => {}
    }
    payload
}

impl Engine {
    /// Move a booking along one edge of the transition graph.
    ///
    /// Validates that the booking exists, the actor is one of its two
    /// parties, the edge exists, and the actor holds the role the edge
    /// requires — all before any mutation. The status write and its slot
    /// side effect commit together under the worker's schedule lock.
    pub async fn request_transition(
        &self,
        booking_id: Ulid,
        acting_user: Ulid,
        target: BookingStatus,
        args: TransitionArgs,
    ) -> Result<Booking, EngineError> {
        args.validate()?;
        let snapshot = self.booking_or_not_found(booking_id)?;
        if !snapshot.is_party(acting_user) {
            return Err(EngineError::Forbidden("not a party to this booking"));
        }
        // Hard precondition, independent of the table: payment is the only
        // entry into Completed.
        if target == BookingStatus::Completed {
            return Err(EngineError::InvalidTransition {
                from: snapshot.status,
                to: target,
            });
        }

        let sched = self.schedules.get_or_create(snapshot.worker_id);
        let guard = self.write_schedule(&sched).await?;
        // Re-read under the lock; the status may have moved since the snapshot.
        let booking = self.booking_or_not_found(booking_id)?;

        let rule = edge_actor(booking.status, target).ok_or(EngineError::InvalidTransition {
            from: booking.status,
            to: target,
        })?;
        if rule == ActorRule::Worker && acting_user != booking.worker_id {
            return Err(EngineError::Forbidden(
                "only the worker may perform this transition",
            ));
        }

        let from = booking.status;
        let now = self.clock.now_ms();
        let event = match target {
            BookingStatus::Confirmed => {
                let span = self.booking_span(&booking);
                if let Err(e) = check_reservable(&guard, booking.scheduled_date, span) {
                    metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
                    return Err(e);
                }
                Event::BookingConfirmed {
                    id: booking_id,
                    slot_id: Ulid::new(),
                    date: booking.scheduled_date,
                    span,
                    at: now,
                }
            }
            BookingStatus::Rejected => Event::BookingRejected {
                id: booking_id,
                at: now,
                reason: args.rejection_reason.clone(),
            },
            BookingStatus::Cancelled => Event::BookingCancelled {
                id: booking_id,
                by: acting_user,
                at: now,
                reason: args.cancellation_reason.clone(),
            },
            BookingStatus::OnTheWay => Event::WorkerEnRoute {
                id: booking_id,
                at: now,
            },
            BookingStatus::InProgress => Event::WorkStarted {
                id: booking_id,
                at: now,
            },
            BookingStatus::WorkFinished => Event::WorkFinished {
                id: booking_id,
                at: now,
                final_cost: args.final_cost,
                completion_photos: args.completion_photos.clone(),
                worker_notes: args.worker_notes.clone(),
            },
            BookingStatus::Pending | BookingStatus::Completed => {
                unreachable!("no edge into {}", target.label())
            }
        };

        let guard = self.persist_and_apply(guard, event).await?;
        let updated = self.booking_or_not_found(booking_id)?;
        drop(guard);

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "target" => target.label())
            .increment(1);
        tracing::info!(
            booking = %booking_id,
            from = from.label(),
            to = target.label(),
            "booking transition"
        );

        // Side effects run outside the lock. Neither may fail the transition.
        if target == BookingStatus::WorkFinished {
            let amount = updated.billable_amount();
            if let Err(e) = self.invoices.issue_from_booking(booking_id, amount).await {
                metrics::counter!(crate::observability::INVOICE_FAILURES_TOTAL).increment(1);
                tracing::warn!("invoice issue failed for {booking_id}: {e}");
            }
        }
        let recipient = updated.counterparty(acting_user);
        self.dispatch(recipient, kind_for(target), transition_payload(&updated, target))
            .await;

        Ok(updated)
    }

    /// Record a payment and complete the booking — the only path to
    /// Completed. Assumes payment authorization already happened externally.
    pub async fn process_payment(
        &self,
        booking_id: Ulid,
        acting_customer: Ulid,
        method: PaymentMethod,
        tip: Option<Cents>,
    ) -> Result<Booking, EngineError> {
        let snapshot = self.booking_or_not_found(booking_id)?;
        if snapshot.customer_id != acting_customer {
            return Err(EngineError::Forbidden("only the customer can pay for a booking"));
        }

        let sched = self.schedules.get_or_create(snapshot.worker_id);
        let guard = self.write_schedule(&sched).await?;
        let booking = self.booking_or_not_found(booking_id)?;

        if booking.payment_status == PaymentStatus::Paid {
            return Err(EngineError::AlreadyPaid(booking_id));
        }
        if booking.status != BookingStatus::WorkFinished {
            return Err(EngineError::InvalidState("work not finished"));
        }

        let event = Event::PaymentRecorded {
            id: booking_id,
            at: self.clock.now_ms(),
            method,
            tip,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        let updated = self.booking_or_not_found(booking_id)?;
        drop(guard);

        metrics::counter!(crate::observability::PAYMENTS_TOTAL).increment(1);
        tracing::info!(
            booking = %booking_id,
            method = method.label(),
            amount = updated.billable_amount(),
            "payment recorded"
        );

        self.dispatch(
            updated.worker_id,
            NotificationKind::PaymentReceived,
            json!({
                "booking_id": booking_id.to_string(),
                "amount": updated.billable_amount(),
                "method": method.label(),
            }),
        )
        .await;

        Ok(updated)
    }

    /// Cancel a booking with a reason. Equivalent to requesting the
    /// Cancelled transition, with the friendlier error the API promises
    /// for the two common no-op states.
    pub async fn cancel(
        &self,
        booking_id: Ulid,
        acting_user: Ulid,
        reason: String,
    ) -> Result<Booking, EngineError> {
        let args = TransitionArgs {
            cancellation_reason: Some(reason),
            ..Default::default()
        };
        match self
            .request_transition(booking_id, acting_user, BookingStatus::Cancelled, args)
            .await
        {
            Err(EngineError::InvalidTransition {
                from: BookingStatus::Completed,
                ..
            }) => Err(EngineError::InvalidState("cannot cancel a completed booking")),
            Err(EngineError::InvalidTransition {
                from: BookingStatus::Cancelled,
                ..
            }) => Err(EngineError::InvalidState("cannot cancel a cancelled booking")),
            other => other,
        }
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for (from, _, _) in EDGES {
            assert!(!from.is_terminal(), "{} must not have outgoing edges", from.label());
        }
    }

    #[test]
    fn completed_never_a_target() {
        assert!(EDGES.iter().all(|(_, to, _)| *to != BookingStatus::Completed));
    }

    #[test]
    fn cancellation_open_to_either_party_from_every_active_state() {
        for from in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::OnTheWay,
            BookingStatus::InProgress,
            BookingStatus::WorkFinished,
        ] {
            assert_eq!(
                edge_actor(from, BookingStatus::Cancelled),
                Some(ActorRule::Either),
                "cancel from {}",
                from.label()
            );
        }
    }

    #[test]
    fn forward_edges_are_worker_only() {
        assert_eq!(
            edge_actor(BookingStatus::Pending, BookingStatus::Confirmed),
            Some(ActorRule::Worker)
        );
        assert_eq!(
            edge_actor(BookingStatus::OnTheWay, BookingStatus::InProgress),
            Some(ActorRule::Worker)
        );
        assert_eq!(edge_actor(BookingStatus::Confirmed, BookingStatus::InProgress), None);
    }
}
