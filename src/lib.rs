//! Booking lifecycle and time-slot availability engine for a field-service
//! marketplace. Customers book time-bounded appointments with workers; the
//! engine owns the status transition graph and the per-worker schedule that
//! keeps two confirmed jobs from ever overlapping.
//!
//! Auth, chat, push delivery and payment processing live outside: the engine
//! consumes them through the traits in [`collab`] and records outcomes only.

pub mod clock;
pub mod collab;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod observability;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collab::{
    CollabError, InvoiceIssuer, InvoiceRef, NotificationDispatcher, NotificationKind, NotifyHub,
    NullInvoiceIssuer,
};
pub use config::EngineConfig;
pub use engine::{Engine, EngineError, FreeSlots, PartyRole, SlotCheck, TransitionArgs};
pub use model::{
    Booking, BookingStatus, Cents, Minute, Ms, NewBooking, PaymentMethod, PaymentStatus,
    ScheduleView, Slot, SlotKind, Span, WorkerStats,
};
