//! Concurrency property: two confirmations for overlapping intervals on the
//! same worker and date can never both succeed, no matter how the requests
//! interleave.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use fieldbook::{
    BookingStatus, Engine, EngineConfig, EngineError, ManualClock, Minute, NewBooking, NotifyHub,
    NullInvoiceIssuer, Span, TransitionArgs,
};

const T0: i64 = 1_764_892_800_000;

fn journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("fieldbook_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine(name: &str) -> Engine {
    Engine::new(
        journal_path(name),
        Arc::new(ManualClock::new(T0)),
        Arc::new(NotifyHub::new()),
        Arc::new(NullInvoiceIssuer),
        EngineConfig::default(),
    )
    .unwrap()
}

/// Deterministic pseudo-random stream; no RNG crate needed for a fuzz
/// schedule that must reproduce across runs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn pick(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn request(worker: Ulid, date: NaiveDate, start: Minute, duration: u32) -> NewBooking {
    NewBooking {
        worker_id: worker,
        service_type: "Electrician".into(),
        job_description: "Outlet repair".into(),
        scheduled_date: date,
        scheduled_time: start,
        estimated_duration: Some(duration),
        estimated_cost: Some(10_000),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fuzzed_concurrent_confirmations_never_overlap() {
    let engine = Arc::new(engine("fuzz_confirm.journal"));
    let customer = Ulid::new();
    let workers: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
    let mut rng = Lcg(0x5EED_1DEA);

    for round in 0u32..5 {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5 + round).unwrap();

        // A pile of pending requests with overlapping candidate intervals.
        let mut pending = Vec::new();
        for _ in 0..24 {
            let worker = workers[rng.pick(workers.len() as u64) as usize];
            let start = 8 * 60 + (rng.pick(108) as Minute) * 5; // 08:00–16:55
            let duration = [30u32, 60, 90][rng.pick(3) as usize];
            let booking = engine
                .create_booking(customer, request(worker, date, start, duration))
                .await
                .unwrap();
            pending.push(booking.id);
        }

        // Confirm all of them at once.
        let mut handles = Vec::new();
        for id in pending {
            let engine = engine.clone();
            let worker = engine.get_booking(id, customer).unwrap().worker_id;
            handles.push(tokio::spawn(async move {
                engine
                    .request_transition(id, worker, BookingStatus::Confirmed, TransitionArgs::default())
                    .await
            }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) | Err(EngineError::SlotConflict(_)) => {}
                Err(e) => panic!("unexpected error during fuzz round {round}: {e}"),
            }
        }

        // Invariant: per worker, confirmed intervals are pairwise disjoint.
        for &worker in &workers {
            let confirmed = engine.worker_bookings(worker, Some(BookingStatus::Confirmed));
            let spans: Vec<(NaiveDate, Span)> = confirmed
                .iter()
                .map(|b| {
                    (
                        b.scheduled_date,
                        Span::from_duration(b.scheduled_time, b.estimated_duration.unwrap()),
                    )
                })
                .collect();
            for (i, (date_a, a)) in spans.iter().enumerate() {
                for (date_b, b) in &spans[i + 1..] {
                    assert!(
                        date_a != date_b || !a.overlaps(b),
                        "double booking on {date_a}: [{}, {}) vs [{}, {})",
                        a.start,
                        a.end,
                        b.start,
                        b.end
                    );
                }
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_cancel_and_confirm_keep_schedule_consistent() {
    let engine = Arc::new(engine("cancel_confirm_race.journal"));
    let customer = Ulid::new();
    let worker = Ulid::new();
    let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();

    // One confirmed booking holding 09:00–10:00, and a rival pending request
    // for the same hour.
    let holder = engine
        .create_booking(customer, request(worker, date, 9 * 60, 60))
        .await
        .unwrap();
    engine
        .request_transition(holder.id, worker, BookingStatus::Confirmed, TransitionArgs::default())
        .await
        .unwrap();
    let rival = engine
        .create_booking(Ulid::new(), request(worker, date, 9 * 60, 60))
        .await
        .unwrap();

    // Cancel the holder while confirming the rival, concurrently.
    let cancel = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .cancel(holder.id, customer, "rescheduling".into())
                .await
        })
    };
    let confirm = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .request_transition(rival.id, worker, BookingStatus::Confirmed, TransitionArgs::default())
                .await
        })
    };

    cancel.await.unwrap().unwrap();
    let rival_result = confirm.await.unwrap();

    // Either serialization is legal; the schedule must stay consistent.
    let holder_after = engine.get_booking(holder.id, customer).unwrap();
    assert_eq!(holder_after.status, BookingStatus::Cancelled);
    match rival_result {
        Ok(b) => {
            assert_eq!(b.status, BookingStatus::Confirmed);
            let check = engine.is_available(worker, date, 9 * 60, Some(60)).await.unwrap();
            assert!(!check.available);
        }
        Err(EngineError::SlotConflict(_)) => {
            // Holder's slot was still live; after its cancellation a
            // re-request of the rival confirmation must succeed.
            let retried = engine
                .request_transition(rival.id, worker, BookingStatus::Confirmed, TransitionArgs::default())
                .await
                .unwrap();
            assert_eq!(retried.status, BookingStatus::Confirmed);
        }
        Err(e) => panic!("unexpected error: {e}"),
    }
}
