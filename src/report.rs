//! Upload reports and the digestion sweep CSV

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, UploadError};
use crate::metrics::{PhaseTimings, Throughput};
use crate::storage::{PartResult, PartTimings};

/// Summary of one finished upload session
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub upload_id: String,
    pub total_size: u64,
    pub transferred_bytes: u64,
    /// Part results sorted by part number
    pub parts: Vec<PartResult>,
    pub timings: PhaseTimings,
}

impl UploadReport {
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Throughput of the transfer phase alone
    pub fn transfer_throughput(&self) -> Throughput {
        Throughput::new(self.transferred_bytes, self.timings.transfer)
    }

    /// Throughput over the whole session
    pub fn total_throughput(&self) -> Throughput {
        Throughput::new(self.transferred_bytes, self.timings.total())
    }

    pub fn part_timing_summary(&self) -> PartTimingSummary {
        PartTimingSummary::from_timings(self.parts.iter().map(|p| &p.timings))
    }
}

/// Mean part durations; sub-steps only count parts that reported them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartTimingSummary {
    pub avg_part: Duration,
    pub avg_create_upload: Duration,
    pub avg_copy_part: Duration,
    pub avg_complete_upload: Duration,
}

impl PartTimingSummary {
    pub fn from_timings<'a>(timings: impl IntoIterator<Item = &'a PartTimings>) -> Self {
        let timings: Vec<&PartTimings> = timings.into_iter().collect();
        Self {
            avg_part: mean(timings.iter().map(|t| t.total)),
            avg_create_upload: mean(timings.iter().filter_map(|t| t.create_upload)),
            avg_copy_part: mean(timings.iter().filter_map(|t| t.copy_part)),
            avg_complete_upload: mean(timings.iter().filter_map(|t| t.complete_upload)),
        }
    }
}

fn mean(durations: impl Iterator<Item = Duration>) -> Duration {
    let (sum, count) = durations.fold((Duration::ZERO, 0u32), |(sum, n), d| (sum + d, n + 1));
    if count == 0 {
        Duration::ZERO
    } else {
        sum / count
    }
}

/// One row of the digestion sweep, durations in seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRow {
    pub workers: usize,
    pub total_time: f64,
    pub total_size: u64,
    pub avg_part_time: f64,
    pub avg_create_upload_time: f64,
    pub avg_copy_part_time: f64,
    pub avg_complete_upload_time: f64,
}

impl SweepRow {
    pub fn new(workers: usize, report: &UploadReport) -> Self {
        let summary = report.part_timing_summary();
        Self {
            workers,
            total_time: report.timings.total().as_secs_f64(),
            total_size: report.total_size,
            avg_part_time: summary.avg_part.as_secs_f64(),
            avg_create_upload_time: summary.avg_create_upload.as_secs_f64(),
            avg_copy_part_time: summary.avg_copy_part.as_secs_f64(),
            avg_complete_upload_time: summary.avg_complete_upload.as_secs_f64(),
        }
    }
}

/// Write sweep rows with a header line
pub fn write_sweep_csv<W: std::io::Write>(writer: W, rows: &[SweepRow]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)
            .map_err(|e| UploadError::Internal { message: format!("CSV write failed: {}", e) })?;
    }
    csv.flush().map_err(|e| UploadError::Io {
        path: "<csv>".into(),
        source: e,
    })
}

/// Write sweep rows to `path`, replacing any existing file
pub fn write_sweep_file(path: &Path, rows: &[SweepRow]) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| UploadError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    write_sweep_csv(file, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_timings(total_ms: u64) -> PartTimings {
        PartTimings {
            total: Duration::from_millis(total_ms),
            create_upload: Some(Duration::from_millis(10)),
            copy_part: Some(Duration::from_millis(total_ms - 20)),
            complete_upload: Some(Duration::from_millis(10)),
        }
    }

    fn report() -> UploadReport {
        UploadReport {
            upload_id: "u".into(),
            total_size: 300,
            transferred_bytes: 300,
            parts: vec![
                PartResult::new(1, 150, "a").with_timings(copy_timings(100)),
                PartResult::new(2, 150, "b").with_timings(copy_timings(300)),
            ],
            timings: PhaseTimings {
                transfer: Duration::from_secs(1),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_summary_means() {
        let summary = report().part_timing_summary();
        assert_eq!(summary.avg_part, Duration::from_millis(200));
        assert_eq!(summary.avg_copy_part, Duration::from_millis(180));
        assert_eq!(summary.avg_create_upload, Duration::from_millis(10));
    }

    #[test]
    fn test_summary_without_substeps() {
        let timings = [PartTimings {
            total: Duration::from_millis(50),
            ..Default::default()
        }];
        let summary = PartTimingSummary::from_timings(timings.iter());
        assert_eq!(summary.avg_part, Duration::from_millis(50));
        assert_eq!(summary.avg_copy_part, Duration::ZERO);
    }

    #[test]
    fn test_csv_header_and_row() {
        let rows = vec![SweepRow::new(4, &report())];
        let mut out = Vec::new();
        write_sweep_csv(&mut out, &rows).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("workers,total_time,total_size,avg_part_time,avg_create_upload_time,avg_copy_part_time,avg_complete_upload_time")
        );
        assert!(lines.next().unwrap().starts_with("4,1.0,300,0.2,"));
    }
}
