//! Bounded transfer worker pool
//!
//! Runs up to `max_concurrency` workers over a shared queue of work units.
//! Every worker builds its own transfer client from the injected factory.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::cancel::CancelSignal;
use crate::error::{Result, UploadError};
use crate::metrics::standard;
use crate::storage::{PartResult, PartTransfer, TransferFactory, WorkUnit};

/// What the pool does after the first failed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep dispatching until the queue is empty
    #[default]
    Drain,
    /// Stop handing out new units; in-flight units still finish
    StopDispatch,
}

/// Configuration for the transfer pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrent workers
    pub max_concurrency: usize,
    /// Behaviour after the first failure
    pub failure_policy: FailurePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            failure_policy: FailurePolicy::Drain,
        }
    }
}

/// Outcome of one pool run
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Successful results, in completion order
    pub results: Vec<PartResult>,
    /// First failure observed, in completion order
    pub first_failure: Option<UploadError>,
    /// Number of units that failed
    pub failed: usize,
    /// Units handed to a worker
    pub attempted: usize,
    /// Units never dispatched because dispatch stopped
    pub skipped: usize,
}

impl PoolReport {
    pub fn is_success(&self) -> bool {
        self.first_failure.is_none()
    }

    /// Successful results, or the first failure if any unit failed
    pub fn into_results(self) -> Result<Vec<PartResult>> {
        match self.first_failure {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

/// Bounded concurrent executor for part transfers
pub struct TransferPool {
    config: PoolConfig,
}

impl TransferPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self::new(PoolConfig {
            max_concurrency,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Transfer every unit and wait for all dispatched workers to finish.
    ///
    /// `factory` is called once per worker before anything is dispatched; a
    /// factory error aborts the run with no unit attempted.
    pub async fn run<F>(&self, units: Vec<WorkUnit>, factory: &F) -> Result<PoolReport>
    where
        F: TransferFactory,
    {
        if self.config.max_concurrency == 0 {
            return Err(UploadError::configuration("max_concurrency must be positive"));
        }
        if units.is_empty() {
            return Ok(PoolReport::default());
        }

        let worker_count = units.len().min(self.config.max_concurrency);
        let clients = (0..worker_count)
            .map(|_| factory.build())
            .collect::<Result<Vec<F::Transfer>>>()?;

        debug!(
            "Transfer pool starting: {} units, {} workers, policy {:?}",
            units.len(),
            worker_count,
            self.config.failure_policy
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(units)));
        let cancel = CancelSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<(u32, Result<PartResult>)>();

        let mut handles = Vec::with_capacity(worker_count);
        for (worker_id, client) in clients.into_iter().enumerate() {
            let queue = queue.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let policy = self.config.failure_policy;

            handles.push(tokio::spawn(async move {
                standard::ACTIVE_WORKERS.inc();
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(unit) = queue.lock().pop_front() else {
                        break;
                    };

                    let number = unit.part.number;
                    debug!(
                        "Worker {} transferring part {} ({} bytes)",
                        worker_id, number, unit.part.size
                    );
                    let outcome = client.transfer(unit).await;

                    if outcome.is_err() && policy == FailurePolicy::StopDispatch && cancel.cancel() {
                        debug!("Worker {} stopped dispatch after part {} failed", worker_id, number);
                    }
                    if tx.send((number, outcome)).is_err() {
                        break;
                    }
                }
                standard::ACTIVE_WORKERS.dec();
            }));
        }
        drop(tx);

        let mut report = PoolReport::default();
        while let Some((number, outcome)) = rx.recv().await {
            report.attempted += 1;
            match outcome {
                Ok(result) => {
                    standard::PARTS_TRANSFERRED.inc();
                    standard::BYTES_TRANSFERRED.inc_by(result.size);
                    standard::PART_TRANSFER_DURATION.observe(result.timings.total);
                    report.results.push(result);
                }
                Err(e) => {
                    standard::PARTS_FAILED.inc();
                    if e.is_retryable() {
                        warn!("Part {} failed with a transient error: {}", number, e);
                    } else {
                        warn!("Part {} failed: {}", number, e);
                    }
                    report.failed += 1;
                    if report.first_failure.is_none() {
                        report.first_failure = Some(e);
                    }
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Transfer worker terminated abnormally: {}", e);
                report.failed += 1;
                if report.first_failure.is_none() {
                    report.first_failure = Some(UploadError::Internal {
                        message: format!("transfer worker panicked: {}", e),
                    });
                }
            }
        }

        report.skipped = queue.lock().len();
        debug!(
            "Transfer pool finished: {} ok, {} failed, {} skipped",
            report.results.len(),
            report.failed,
            report.skipped
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PartDescriptor;
    use crate::storage::Destination;

    struct EchoTransfer;

    impl PartTransfer for EchoTransfer {
        async fn transfer(&self, unit: WorkUnit) -> Result<PartResult> {
            Ok(PartResult::new(unit.part.number, unit.part.size, "etag"))
        }
    }

    fn echo() -> Result<EchoTransfer> {
        Ok(EchoTransfer)
    }

    fn unit(number: u32) -> WorkUnit {
        WorkUnit::new(
            PartDescriptor {
                number,
                offset: (number as u64 - 1) * 10,
                size: 10,
            },
            Destination::Presigned {
                url: format!("http://store/{}", number),
            },
        )
    }

    #[tokio::test]
    async fn test_empty_run() {
        let pool = TransferPool::with_concurrency(4);
        let report = pool.run(Vec::new(), &echo).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let pool = TransferPool::with_concurrency(0);
        let err = pool.run(vec![unit(1)], &echo).await.unwrap_err();
        assert!(matches!(err, UploadError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_factory_called_once_per_worker() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let pool = TransferPool::with_concurrency(3);
        let units = (1..=10).map(unit).collect();

        let report = pool
            .run(units, &|| -> Result<EchoTransfer> {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(EchoTransfer)
            })
            .await
            .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(report.results.len(), 10);
    }

    #[tokio::test]
    async fn test_factory_error_aborts() {
        let pool = TransferPool::with_concurrency(2);
        let result = pool
            .run(vec![unit(1)], &|| -> Result<EchoTransfer> {
                Err(UploadError::configuration("no client"))
            })
            .await;
        assert!(result.is_err());
    }
}
