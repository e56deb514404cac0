//! Upload Bench - multipart upload engine for S3-compatible stores
//!
//! This crate provides:
//! - Part planning under object-store limits
//! - A bounded concurrent transfer pool
//! - Presigned PUT and server-side range-copy transfer clients
//! - Upload sessions driven against a coordination service
//! - Zarr and digestion benchmark variants

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod report;
pub mod runtime;
pub mod storage;
pub mod zarr;

pub use coordinator::{ApiClient, CoordinationService, UploadCoordinator};
pub use error::{Result, UploadError};
pub use plan::{plan_parts, PartPlan};
pub use runtime::TransferPool;

/// Default target part size in bytes (150 KiB)
pub const DEFAULT_PART_SIZE: u64 = plan::kib(150);

/// Default number of concurrent direct uploads
pub const DEFAULT_CONCURRENCY: usize = 10;
