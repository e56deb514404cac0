//! Units of work and per-part results shared by transfer clients and the pool

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::plan::PartDescriptor;

/// Where a part's bytes end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Presigned URL accepting a direct PUT of the part bytes
    Presigned { url: String },
    /// Server-side copy of the part's byte range out of an existing object
    RangeCopy { bucket: String, source_key: String },
}

impl Destination {
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Presigned { .. } => "presigned",
            Destination::RangeCopy { .. } => "range-copy",
        }
    }
}

/// A part paired with its destination, handed to exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub part: PartDescriptor,
    pub destination: Destination,
}

impl WorkUnit {
    pub fn new(part: PartDescriptor, destination: Destination) -> Self {
        Self { part, destination }
    }
}

/// Wall-clock breakdown of one part transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartTimings {
    pub total: Duration,
    /// CreateMultipartUpload, copy mode only
    pub create_upload: Option<Duration>,
    /// UploadPartCopy, copy mode only
    pub copy_part: Option<Duration>,
    /// CompleteMultipartUpload, copy mode only
    pub complete_upload: Option<Duration>,
}

/// Completion metadata for one successfully transferred part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartResult {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    #[serde(skip)]
    pub timings: PartTimings,
}

impl PartResult {
    pub fn new(part_number: u32, size: u64, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            size,
            etag: etag.into(),
            timings: PartTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: PartTimings) -> Self {
        self.timings = timings;
        self
    }
}

/// Moves one part's bytes to its destination.
///
/// Each pool worker owns its own instance, so implementations may hold a
/// connection pool without sharing it across workers.
pub trait PartTransfer: Send + Sync + 'static {
    fn transfer(&self, unit: WorkUnit) -> impl Future<Output = Result<PartResult>> + Send;
}

/// Builds one transfer client per pool worker
pub trait TransferFactory {
    type Transfer: PartTransfer;

    fn build(&self) -> Result<Self::Transfer>;
}

impl<F, T> TransferFactory for F
where
    F: Fn() -> Result<T>,
    T: PartTransfer,
{
    type Transfer = T;

    fn build(&self) -> Result<T> {
        self()
    }
}
