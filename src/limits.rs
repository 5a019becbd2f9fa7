//! Input bounds enforced at the engine surface.

pub const MAX_SLOTS_PER_WORKER: usize = 4096;
pub const MAX_ACTIVE_BOOKINGS_PER_WORKER: usize = 1024;

pub const MAX_SERVICE_TYPE_LEN: usize = 64;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_NOTE_LEN: usize = 512;
pub const MAX_WORKER_NOTES_LEN: usize = 2048;
pub const MAX_PHOTOS_PER_BOOKING: usize = 16;
pub const MAX_PHOTO_URL_LEN: usize = 1024;

/// Widest date range a schedule query may cover.
pub const MAX_SCHEDULE_QUERY_DAYS: i64 = 92;

/// Smallest granularity `list_free_slots` accepts.
pub const MIN_SLOT_GRANULARITY_MIN: u32 = 5;
