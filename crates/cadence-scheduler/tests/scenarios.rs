//! End-to-end behaviour of the scheduler against the real clock.
//!
//! Timings use generous margins; each test runs for a few seconds at most.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cadence_core::SchedulerSettings;
use cadence_scheduler::{
    job_fn, CoalesceReason, CronConfig, CronValue, DateConfig, EventListener, ExecutionEvent,
    IntervalConfig, JobCall, JobError, JobRegistry, JobSpec, Outcome, Scheduler, SchedulerError,
    ShutdownMode, TriggerConfig,
};
use chrono::Utc;
use serde_json::{json, Value};

fn every_second() -> TriggerConfig {
    TriggerConfig::Interval(IntervalConfig {
        seconds: 1,
        ..Default::default()
    })
}

fn hourly() -> TriggerConfig {
    TriggerConfig::Interval(IntervalConfig {
        hours: 1,
        ..Default::default()
    })
}

fn sleeper(ms: u64) -> impl cadence_scheduler::JobFunction {
    job_fn("sleeps, then returns", move |_| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!("done"))
    })
}

/// Tracks how many bodies run at once.
#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

fn tracked(ms: u64, counter: Arc<Concurrency>) -> impl cadence_scheduler::JobFunction {
    job_fn("tracked sleeper", move |_| {
        let counter = Arc::clone(&counter);
        async move {
            let now = counter.current.fetch_add(1, Ordering::SeqCst) + 1;
            counter.peak.fetch_max(now, Ordering::SeqCst);
            counter.total.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            counter.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    })
}

fn count(events: &[ExecutionEvent], pred: impl Fn(&Outcome) -> bool) -> usize {
    events.iter().filter(|e| pred(&e.outcome)).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interval_job_runs_repeatedly() {
    let mut registry = JobRegistry::new();
    registry.register("echo", job_fn("echo", |c: JobCall| async move {
        Ok(c.arg(0, "value").cloned().unwrap_or(Value::Null))
    }));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler
        .add_job(JobSpec::new("tick", "echo", every_second()).with_kwarg("value", json!(7)))
        .unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    let results = scheduler.get_results(&job.id);
    assert!(results.len() >= 2, "expected two runs, got {results:?}");
    for event in &results {
        assert_eq!(event.outcome, Outcome::Success { value: json!(7) });
        assert!(event.execution_time >= event.scheduled_time);
    }
    assert!(results.windows(2).all(|w| w[0].scheduled_time < w[1].scheduled_time));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn date_job_fires_once_then_is_exhausted() {
    let counter = Arc::new(Concurrency::default());
    let mut registry = JobRegistry::new();
    registry.register("once", tracked(10, Arc::clone(&counter)));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler
        .add_job(JobSpec::new(
            "once",
            "once",
            TriggerConfig::Date(DateConfig {
                run_date: Utc::now() + chrono::Duration::milliseconds(400),
            }),
        ))
        .unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    assert_eq!(counter.total.load(Ordering::SeqCst), 1);
    let stored = scheduler.get_job(&job.id).expect("exhausted jobs stay listed");
    assert!(stored.next_run_time.is_none());
    assert_eq!(scheduler.get_results(&job.id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cron_every_second_dispatches() {
    let counter = Arc::new(Concurrency::default());
    let mut registry = JobRegistry::new();
    registry.register("tick", tracked(10, Arc::clone(&counter)));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler
        .add_job(JobSpec::new(
            "cron",
            "tick",
            TriggerConfig::Cron(CronConfig {
                second: Some(CronValue::Expr("*".to_string())),
                ..Default::default()
            }),
        ))
        .unwrap();
    assert!(job.trigger_description().starts_with("cron["));
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(2300)).await;
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    assert!(counter.total.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_runs_are_coalesced() {
    let counter = Arc::new(Concurrency::default());
    let mut registry = JobRegistry::new();
    registry.register("slow", tracked(2500, Arc::clone(&counter)));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler
        .add_job(JobSpec::new("slow", "slow", every_second()).with_max_instances(1))
        .unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(4600)).await;
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    assert_eq!(counter.peak.load(Ordering::SeqCst), 1);
    let results = scheduler.get_results(&job.id);
    let coalesced = count(&results, |o| {
        matches!(o, Outcome::Coalesced { reason: CoalesceReason::MaxInstances })
    });
    assert!(coalesced >= 1, "expected coalesced occurrences in {results:?}");
    assert!(count(&results, Outcome::is_success) >= 1);
    assert_eq!(scheduler.get_job(&job.id).unwrap().running_instances, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saturated_pool_coalesces_instead_of_queueing() {
    let mut registry = JobRegistry::new();
    registry.register("slow", sleeper(1500));
    let settings = SchedulerSettings {
        worker_count: 1,
        submit_timeout_ms: 50,
        ..Default::default()
    };
    let scheduler = Scheduler::new(settings, registry).unwrap();

    // Same anchor so both jobs fall due in one dispatch cycle.
    let start = Utc::now() + chrono::Duration::milliseconds(500);
    let trigger = TriggerConfig::Interval(IntervalConfig {
        seconds: 10,
        start_date: Some(start),
        ..Default::default()
    });
    let a = scheduler.add_job(JobSpec::new("a", "slow", trigger.clone())).unwrap();
    let b = scheduler.add_job(JobSpec::new("b", "slow", trigger)).unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(scheduler.status().in_flight, 1);
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    let all: Vec<ExecutionEvent> = [a.id, b.id]
        .iter()
        .flat_map(|id| scheduler.get_results(id))
        .collect();
    assert_eq!(count(&all, Outcome::is_success), 1);
    assert_eq!(
        count(&all, |o| matches!(
            o,
            Outcome::Coalesced { reason: CoalesceReason::PoolSaturated }
        )),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_occurrence_is_missed_not_run() {
    let counter = Arc::new(Concurrency::default());
    let mut registry = JobRegistry::new();
    registry.register("tick", tracked(10, Arc::clone(&counter)));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler
        .add_job(JobSpec::new("strict", "tick", every_second()).with_misfire_grace_time(0))
        .unwrap();
    scheduler.start().unwrap();
    scheduler.pause().unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.resume().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    assert_eq!(counter.total.load(Ordering::SeqCst), 0);
    let results = scheduler.get_results(&job.id);
    match results.first().map(|e| &e.outcome) {
        Some(Outcome::Missed { late_by_secs }) => assert!(*late_by_secs >= 1.0),
        other => panic!("expected a missed occurrence, got {other:?}"),
    }
    // Re-anchored on the resume time, not replayed slot by slot.
    assert_eq!(results.len(), 1);
    assert!(scheduler.get_job(&job.id).unwrap().next_run_time.unwrap() > Utc::now());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paused_job_is_skipped_until_resumed() {
    let counter = Arc::new(Concurrency::default());
    let mut registry = JobRegistry::new();
    registry.register("tick", tracked(10, Arc::clone(&counter)));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler.add_job(JobSpec::new("tick", "tick", every_second())).unwrap();
    scheduler.pause_job(&job.id).unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(counter.total.load(Ordering::SeqCst), 0);
    assert!(scheduler.get_job(&job.id).unwrap().paused);

    scheduler.resume_job(&job.id).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    // The overdue slot is within the 30s grace window, so it runs on resume.
    assert!(counter.total.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removing_a_running_job_keeps_its_result() {
    let mut registry = JobRegistry::new();
    registry.register("slow", sleeper(500));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler.add_job(JobSpec::new("slow", "slow", hourly())).unwrap();
    scheduler.start().unwrap();

    let handle = scheduler.fire_now(&job.id).await.unwrap();
    scheduler.remove_job(&job.id).unwrap();
    assert!(scheduler.list_jobs().is_empty());
    assert!(scheduler.get_job(&job.id).is_none());

    let event = handle.await.unwrap();
    assert_eq!(event.outcome, Outcome::Success { value: json!("done") });
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();
    assert_eq!(scheduler.get_results(&job.id), vec![event]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fire_now_honours_max_instances() {
    let mut registry = JobRegistry::new();
    registry.register("slow", sleeper(500));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler
        .add_job(JobSpec::new("slow", "slow", hourly()).with_max_instances(1))
        .unwrap();
    scheduler.start().unwrap();

    let first = scheduler.fire_now(&job.id).await.unwrap();
    let second = scheduler.fire_now(&job.id).await;
    assert!(matches!(
        second,
        Err(SchedulerError::MaxInstancesReached { max: 1, .. })
    ));
    assert!(matches!(
        scheduler.fire_now("ghost").await,
        Err(SchedulerError::JobNotFound { .. })
    ));

    first.await.unwrap();
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();
    assert_eq!(scheduler.get_job(&job.id).unwrap().running_instances, 0);
}

#[derive(Default)]
struct Collector {
    failures: Mutex<Vec<String>>,
    successes: AtomicUsize,
}

impl EventListener for Collector {
    fn on_success(&self, _event: &ExecutionEvent) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, event: &ExecutionEvent) {
        if let Outcome::Failure { error, .. } = &event.outcome {
            self.failures.lock().unwrap().push(error.clone());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_and_panics_do_not_stop_the_loop() {
    let mut registry = JobRegistry::new();
    registry.register("fails", job_fn("always fails", |_| async {
        Err::<Value, _>(JobError::new("backup target unreachable"))
    }));
    registry.register("panics", job_fn("always panics", |_| async {
        if true {
            panic!("index out of range");
        }
        Ok(Value::Null)
    }));
    registry.register("ok", sleeper(10));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let collector = Arc::new(Collector::default());
    scheduler.subscribe(collector.clone());

    let fails = scheduler.add_job(JobSpec::new("fails", "fails", hourly())).unwrap();
    let panics = scheduler.add_job(JobSpec::new("panics", "panics", hourly())).unwrap();
    let ok = scheduler.add_job(JobSpec::new("ok", "ok", every_second())).unwrap();
    scheduler.start().unwrap();

    scheduler.fire_now(&fails.id).await.unwrap().await.unwrap();
    scheduler.fire_now(&panics.id).await.unwrap().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(scheduler.status().running);
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    let failures = collector.failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|e| e == "backup target unreachable"));
    assert!(failures.iter().any(|e| e.contains("index out of range")));
    assert!(collector.successes.load(Ordering::SeqCst) >= 1);
    assert!(!scheduler.get_results(&ok.id).is_empty());
    assert!(scheduler.get_results(&panics.id)[0].outcome.is_failure());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drain_waits_for_in_flight_runs() {
    let mut registry = JobRegistry::new();
    registry.register("slow", sleeper(400));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler.add_job(JobSpec::new("slow", "slow", hourly())).unwrap();
    scheduler.start().unwrap();

    scheduler.fire_now(&job.id).await.unwrap();
    let started = Instant::now();
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(scheduler.get_results(&job.id).len(), 1);
    assert_eq!(scheduler.status().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn immediate_shutdown_returns_before_runs_finish() {
    let mut registry = JobRegistry::new();
    registry.register("slow", sleeper(600));
    let scheduler = Scheduler::new(SchedulerSettings::default(), registry).unwrap();
    let job = scheduler.add_job(JobSpec::new("slow", "slow", hourly())).unwrap();
    scheduler.start().unwrap();

    scheduler.fire_now(&job.id).await.unwrap();
    let started = Instant::now();
    scheduler.shutdown(ShutdownMode::Immediate).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));

    // The previous run is still being drained in the background.
    assert!(matches!(scheduler.start(), Err(SchedulerError::ShuttingDown)));

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(scheduler.get_results(&job.id).len(), 1);
    scheduler.start().unwrap();
    scheduler.shutdown(ShutdownMode::Drain).await.unwrap();
}
