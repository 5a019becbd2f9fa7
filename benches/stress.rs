//! In-process stress run: booking creation and confirmation latency under
//! concurrent load, plus a sanity check that the schedule never double-books.
//!
//! Run with `cargo bench --bench stress`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use fieldbook::{
    BookingStatus, Engine, EngineConfig, EngineError, NewBooking, NotifyHub, NullInvoiceIssuer,
    Span, SystemClock, TransitionArgs,
};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn request(worker: Ulid, date: NaiveDate, start: i32) -> NewBooking {
    NewBooking {
        worker_id: worker,
        service_type: "Electrician".into(),
        job_description: "Bench job".into(),
        scheduled_date: date,
        scheduled_time: start,
        estimated_duration: Some(30),
        estimated_cost: Some(10_000),
    }
}

async fn bench_disjoint_confirms(engine: Arc<Engine>, workers: &[Ulid]) {
    // Every worker gets a full day of back-to-back half-hour jobs.
    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let customer = Ulid::new();

    let mut create_lat = Vec::new();
    let mut ids = Vec::new();
    for &worker in workers {
        for slot in 0..20 {
            let start = 8 * 60 + slot * 30;
            let t = Instant::now();
            let b = engine
                .create_booking(customer, request(worker, date, start))
                .await
                .unwrap();
            create_lat.push(t.elapsed());
            ids.push((b.id, worker));
        }
    }
    print_latency("create_booking (disjoint)", &mut create_lat);

    let mut handles = Vec::new();
    for (id, worker) in ids {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine
                .request_transition(id, worker, BookingStatus::Confirmed, TransitionArgs::default())
                .await;
            result.unwrap();
            t.elapsed()
        }));
    }
    let mut confirm_lat = Vec::new();
    for handle in handles {
        confirm_lat.push(handle.await.unwrap());
    }
    print_latency("confirm (disjoint, concurrent)", &mut confirm_lat);
}

async fn bench_contended_confirms(engine: Arc<Engine>, rounds: usize) {
    // Every round: many pending requests for the SAME hour on one worker,
    // confirmed concurrently. Exactly one may win per round.
    let customer = Ulid::new();
    let worker = Ulid::new();

    let mut latencies = Vec::new();
    for round in 0..rounds {
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap() + chrono::Days::new(round as u64);
        let mut ids = Vec::new();
        for _ in 0..16 {
            let b = engine
                .create_booking(customer, request(worker, date, 9 * 60))
                .await
                .unwrap();
            ids.push(b.id);
        }

        let mut handles = Vec::new();
        for id in ids {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let t = Instant::now();
                let result = engine
                    .request_transition(id, worker, BookingStatus::Confirmed, TransitionArgs::default())
                    .await;
                (t.elapsed(), result)
            }));
        }

        let mut winners = 0;
        for handle in handles {
            let (lat, result) = handle.await.unwrap();
            latencies.push(lat);
            match result {
                Ok(_) => winners += 1,
                Err(EngineError::SlotConflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1, "round {round}: exactly one confirmation may win");
    }
    print_latency("confirm (contended, 16-way)", &mut latencies);
}

async fn bench_availability_reads(engine: Arc<Engine>, worker: Ulid) {
    let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let mut latencies = Vec::new();
    for i in 0..2_000 {
        let start = 8 * 60 + (i % 20) * 30;
        let t = Instant::now();
        engine
            .is_available(worker, date, start, Some(30))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("is_available", &mut latencies);
}

fn verify_no_overlap(bookings: &[fieldbook::Booking]) {
    for (i, a) in bookings.iter().enumerate() {
        let span_a = Span::from_duration(a.scheduled_time, a.estimated_duration.unwrap());
        for b in &bookings[i + 1..] {
            if a.scheduled_date != b.scheduled_date {
                continue;
            }
            let span_b = Span::from_duration(b.scheduled_time, b.estimated_duration.unwrap());
            assert!(
                !span_a.overlaps(&span_b),
                "double booking: {} and {}",
                a.id,
                b.id
            );
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let metrics_port: Option<u16> = std::env::var("FIELDBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    fieldbook::observability::init(metrics_port);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let dir = std::env::temp_dir().join("fieldbook_bench");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("stress_{}.journal", Ulid::new()));

        let engine = Arc::new(
            Engine::new(
                path.clone(),
                Arc::new(SystemClock),
                Arc::new(NotifyHub::new()),
                Arc::new(NullInvoiceIssuer),
                EngineConfig::default(),
            )
            .unwrap(),
        );

        let workers: Vec<Ulid> = (0..10).map(|_| Ulid::new()).collect();

        println!("disjoint load ({} workers):", workers.len());
        let t = Instant::now();
        bench_disjoint_confirms(engine.clone(), &workers).await;
        println!("  total: {:.2}s", t.elapsed().as_secs_f64());

        println!("contended load:");
        bench_contended_confirms(engine.clone(), 20).await;

        println!("read load:");
        bench_availability_reads(engine.clone(), workers[0]).await;

        for &worker in &workers {
            let confirmed = engine.worker_bookings(worker, Some(BookingStatus::Confirmed));
            verify_no_overlap(&confirmed);
        }
        println!("schedule invariant holds across {} workers", workers.len());

        let _ = std::fs::remove_file(&path);
    });
}
