use std::time::Duration;

use crate::model::{parse_hhmm, Minute};

/// Engine tuning. `Default` matches the shipped marketplace behavior;
/// `from_env` overrides individual knobs via `FIELDBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Start of the bookable day for free-slot listings.
    pub working_hours_start: Minute,
    /// End of the bookable day (exclusive).
    pub working_hours_end: Minute,
    /// Step and length of offered candidate slots, in minutes.
    pub slot_granularity_min: u32,
    /// Duration substituted when a booking carries none.
    pub default_duration_min: u32,
    /// Bound on acquiring a worker schedule lock.
    pub lock_timeout: Duration,
    /// Bound on a journal append round trip.
    pub journal_timeout: Duration,
    /// Retries for read-only schedule checks that hit a timeout.
    pub read_retries: u32,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            working_hours_start: 8 * 60,
            working_hours_end: 18 * 60,
            slot_granularity_min: 60,
            default_duration_min: 60,
            lock_timeout: Duration::from_secs(2),
            journal_timeout: Duration::from_secs(5),
            read_retries: 2,
            compact_threshold: 1000,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults.
    /// Hours accept either "HH:MM" or plain minutes since midnight.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            working_hours_start: env_minute("FIELDBOOK_WORKING_HOURS_START")
                .unwrap_or(defaults.working_hours_start),
            working_hours_end: env_minute("FIELDBOOK_WORKING_HOURS_END")
                .unwrap_or(defaults.working_hours_end),
            slot_granularity_min: env_parse("FIELDBOOK_SLOT_GRANULARITY_MIN")
                .unwrap_or(defaults.slot_granularity_min),
            default_duration_min: env_parse("FIELDBOOK_DEFAULT_DURATION_MIN")
                .unwrap_or(defaults.default_duration_min),
            lock_timeout: env_parse("FIELDBOOK_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            journal_timeout: env_parse("FIELDBOOK_JOURNAL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.journal_timeout),
            read_retries: env_parse("FIELDBOOK_READ_RETRIES").unwrap_or(defaults.read_retries),
            compact_threshold: env_parse("FIELDBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_minute(key: &str) -> Option<Minute> {
    let raw = std::env::var(key).ok()?;
    parse_hhmm(&raw).or_else(|| raw.parse().ok())
}
