//! Contracts for external collaborators. Transport and delivery are theirs;
//! the engine only fires the calls.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Cents;

const CHANNEL_CAPACITY: usize = 256;

/// Message kinds keyed to booking lifecycle changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    NewBooking,
    BookingAccepted,
    BookingRejected,
    BookingCancelled,
    WorkerOnTheWay,
    JobStarted,
    WorkFinished,
    JobCompleted,
    PaymentReceived,
}

#[derive(Debug)]
pub struct CollabError(pub String);

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collaborator error: {}", self.0)
    }
}

impl std::error::Error for CollabError {}

/// Fire-and-forget notification sink. The engine never blocks on or retries
/// delivery; implementations must enqueue cheaply.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, user_id: Ulid, kind: NotificationKind, payload: serde_json::Value);
}

/// Reference to an invoice held by the billing collaborator.
pub type InvoiceRef = String;

/// Creates or refreshes the invoice for a finished job. Idempotent on the
/// collaborator side; calling twice for one booking must not double-bill.
#[async_trait]
pub trait InvoiceIssuer: Send + Sync {
    async fn issue_from_booking(
        &self,
        booking_id: Ulid,
        amount: Cents,
    ) -> Result<InvoiceRef, CollabError>;
}

/// A delivered in-process notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub user_id: Ulid,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

/// Broadcast hub for in-process subscribers, one channel per user.
/// Sending to a user nobody listens to is a no-op.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Remove a user's channel.
    pub fn remove(&self, user_id: &Ulid) {
        self.channels.remove(user_id);
    }
}

#[async_trait]
impl NotificationDispatcher for NotifyHub {
    async fn notify(&self, user_id: Ulid, kind: NotificationKind, payload: serde_json::Value) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(Notification {
                user_id,
                kind,
                payload,
            });
        }
    }
}

/// Issuer that acknowledges every request without billing anyone.
/// Stands in where no billing collaborator is wired up.
pub struct NullInvoiceIssuer;

#[async_trait]
impl InvoiceIssuer for NullInvoiceIssuer {
    async fn issue_from_booking(
        &self,
        booking_id: Ulid,
        _amount: Cents,
    ) -> Result<InvoiceRef, CollabError> {
        Ok(format!("inv_{booking_id}"))
    }
}
