//! Transfer metrics and phase timing
//!
//! Process-wide transfer counters rendered in the Prometheus text format, plus
//! the wall-clock helpers used for benchmark reports.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-part latency bucket bounds, in seconds
const LATENCY_BOUNDS: [f64; 10] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0];

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Monotonic count of parts or bytes
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "counter");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Number of workers currently holding a part
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "gauge");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Part latency distribution over [`LATENCY_BOUNDS`]
///
/// Bucket counts are stored non-cumulatively and summed when rendered.
pub struct LatencyHistogram {
    name: &'static str,
    help: &'static str,
    buckets: [AtomicU64; LATENCY_BOUNDS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            buckets: [const { AtomicU64::new(0) }; LATENCY_BOUNDS.len()],
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if let Some(idx) = LATENCY_BOUNDS.iter().position(|bound| secs <= *bound) {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "histogram");
        let mut cumulative = 0;
        for (bound, bucket) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            cumulative += bucket.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", self.name, bound, cumulative);
        }
        let count = self.count();
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", self.name, count);
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_sum {}", self.name, sum);
        let _ = writeln!(out, "{}_count {}", self.name, count);
    }
}

/// Process-wide transfer metrics
pub mod standard {
    use super::{Counter, Gauge, LatencyHistogram};

    pub static PARTS_TRANSFERRED: Counter =
        Counter::new("upload_parts_transferred_total", "Parts transferred successfully");

    pub static PARTS_FAILED: Counter = Counter::new("upload_parts_failed_total", "Part transfers that failed");

    pub static BYTES_TRANSFERRED: Counter =
        Counter::new("upload_bytes_transferred_total", "Bytes acknowledged by the object store");

    pub static ACTIVE_WORKERS: Gauge = Gauge::new("upload_active_workers", "Transfer workers currently running");

    pub static PART_TRANSFER_DURATION: LatencyHistogram =
        LatencyHistogram::new("upload_part_duration_seconds", "Per-part transfer latency");
}

/// Render every standard metric in the Prometheus text format
pub fn gather_system_metrics() -> String {
    let mut out = String::new();
    standard::PARTS_TRANSFERRED.render(&mut out);
    standard::PARTS_FAILED.render(&mut out);
    standard::BYTES_TRANSFERRED.render(&mut out);
    standard::ACTIVE_WORKERS.render(&mut out);
    standard::PART_TRANSFER_DURATION.render(&mut out);
    out
}

/// Lap timer: `mark` returns the time since the previous mark
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    last_mark: Instant,
}

impl Timer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_mark: now,
        }
    }

    pub fn mark(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now - self.last_mark;
        self.last_mark = now;
        lap
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Durations of the upload session phases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    pub initialize: Duration,
    pub transfer: Duration,
    pub complete: Duration,
    /// Replaying the presigned completion against the object store
    pub post_complete: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.initialize + self.transfer + self.complete + self.post_complete
    }
}

/// Bytes moved over a duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    /// Decimal megabytes per second
    pub fn megabytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / 1_000_000.0 / secs
    }

    pub fn megabits_per_sec(&self) -> f64 {
        self.megabytes_per_sec() * 8.0
    }
}

impl std::fmt::Display for Throughput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.4} MB/s, {:.4} Mbit/s",
            self.megabytes_per_sec(),
            self.megabits_per_sec()
        )
    }
}
