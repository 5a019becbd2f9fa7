use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::{Booking, WorkerSchedule};

pub type SharedSchedule = Arc<RwLock<WorkerSchedule>>;

/// System of record for bookings. Entries are only written while the owning
/// worker's schedule lock is held; reads may happen lock-free.
pub struct BookingStore {
    bookings: DashMap<Ulid, Booking>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn insert(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    /// Apply a mutation to a stored booking. No-op if absent.
    pub fn update(&self, id: &Ulid, f: impl FnOnce(&mut Booking)) {
        if let Some(mut entry) = self.bookings.get_mut(id) {
            f(entry.value_mut());
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Snapshot of bookings matching a predicate.
    pub fn collect(&self, mut pred: impl FnMut(&Booking) -> bool) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }
}

/// Per-worker schedules, created lazily on first touch.
pub struct ScheduleStore {
    schedules: DashMap<Ulid, SharedSchedule>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self {
            schedules: DashMap::new(),
        }
    }

    pub fn get(&self, worker_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(worker_id).map(|e| e.value().clone())
    }

    pub fn get_or_create(&self, worker_id: Ulid) -> SharedSchedule {
        let entry = self
            .schedules
            .entry(worker_id)
            .or_insert_with(|| Arc::new(RwLock::new(WorkerSchedule::new(worker_id))));
        let shared = entry.value().clone();
        drop(entry);
        metrics::gauge!(crate::observability::SCHEDULES_ACTIVE).set(self.schedules.len() as f64);
        shared
    }

    pub fn worker_ids(&self) -> Vec<Ulid> {
        self.schedules.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }
}
