//! Unit tests for the transfer pool
//!
//! Tests the concurrency bound, drain semantics and dispatch stop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use upload_bench::plan::{plan_parts, PartLimits};
use upload_bench::runtime::{FailurePolicy, PoolConfig, TransferPool};
use upload_bench::storage::{Destination, PartResult, PartTransfer, TransferFactory, WorkUnit};
use upload_bench::{Result, UploadError};

#[derive(Default)]
struct Probe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    attempted: AtomicUsize,
    clients: AtomicUsize,
}

struct SlowTransfer {
    probe: Arc<Probe>,
    failing: Arc<HashSet<u32>>,
}

impl PartTransfer for SlowTransfer {
    async fn transfer(&self, unit: WorkUnit) -> Result<PartResult> {
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(now, Ordering::SeqCst);
        self.probe.attempted.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(5)).await;
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&unit.part.number) {
            return Err(UploadError::transfer(unit.part.number, "injected failure"));
        }
        Ok(PartResult::new(
            unit.part.number,
            unit.part.size,
            format!("etag-{}", unit.part.number),
        ))
    }
}

struct SlowFactory {
    probe: Arc<Probe>,
    failing: Arc<HashSet<u32>>,
}

impl SlowFactory {
    fn new(failing: &[u32]) -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            failing: Arc::new(failing.iter().copied().collect()),
        }
    }
}

impl TransferFactory for SlowFactory {
    type Transfer = SlowTransfer;

    fn build(&self) -> Result<SlowTransfer> {
        self.probe.clients.fetch_add(1, Ordering::SeqCst);
        Ok(SlowTransfer {
            probe: self.probe.clone(),
            failing: self.failing.clone(),
        })
    }
}

fn units(count: u64) -> Vec<WorkUnit> {
    plan_parts(count * 100, 100, &PartLimits::default())
        .unwrap()
        .into_iter()
        .map(|part| {
            WorkUnit::new(
                part,
                Destination::Presigned {
                    url: format!("mem://part/{}", part.number),
                },
            )
        })
        .collect()
}

#[tokio::test]
async fn test_all_units_transferred_with_bounded_concurrency() {
    let factory = SlowFactory::new(&[]);
    let pool = TransferPool::with_concurrency(4);

    let report = pool.run(units(25), &factory).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.results.len(), 25);
    assert_eq!(report.attempted, 25);
    assert_eq!(factory.probe.clients.load(Ordering::SeqCst), 4);
    assert!(factory.probe.peak.load(Ordering::SeqCst) <= 4);

    let numbers: HashSet<u32> = report.results.iter().map(|r| r.part_number).collect();
    assert_eq!(numbers.len(), 25, "Every part exactly once");
}

#[tokio::test]
async fn test_fewer_units_than_workers() {
    let factory = SlowFactory::new(&[]);
    let pool = TransferPool::with_concurrency(10);

    let report = pool.run(units(3), &factory).await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(factory.probe.clients.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_drain_attempts_every_unit() {
    let factory = SlowFactory::new(&[5]);
    let pool = TransferPool::with_concurrency(3);

    let report = pool.run(units(10), &factory).await.unwrap();

    assert_eq!(factory.probe.attempted.load(Ordering::SeqCst), 10);
    assert_eq!(report.attempted, 10);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.results.len(), 9);

    let err = report.into_results().unwrap_err();
    assert_eq!(err.part_number(), Some(5));
}

#[tokio::test]
async fn test_first_failure_in_completion_order() {
    let factory = SlowFactory::new(&[2, 9]);
    let pool = TransferPool::with_concurrency(1);

    let report = pool.run(units(10), &factory).await.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.first_failure.as_ref().and_then(|e| e.part_number()), Some(2));
}

#[tokio::test]
async fn test_stop_dispatch_skips_remaining_units() {
    let factory = SlowFactory::new(&[1]);
    let pool = TransferPool::new(PoolConfig {
        max_concurrency: 1,
        failure_policy: FailurePolicy::StopDispatch,
    });

    let report = pool.run(units(10), &factory).await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.skipped, 9);
    assert!(report.results.is_empty());
    assert!(!report.is_success());
}
