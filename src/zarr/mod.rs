//! Zarr archive upload benchmark

pub mod client;
pub mod source;

pub use client::{ZarrClient, ZarrOptions, ZarrReport, ZarrUpload};
pub use source::{generate_source_files, index_dir, scan_source_files, SourceFile};
