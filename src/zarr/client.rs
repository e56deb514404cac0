//! Zarr archive uploads
//!
//! Every file of a local tree is one presigned PUT. The service grants URLs
//! for the whole batch at once; the transfer pool then moves the files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::source::{scan_source_files, SourceFile};
use crate::config::{ApiConfig, StoreConfig};
use crate::coordinator::ApiClient;
use crate::error::{Result, UploadError};
use crate::metrics::{Throughput, Timer};
use crate::plan::PartDescriptor;
use crate::runtime::TransferPool;
use crate::storage::{Destination, PayloadSource, PresignedPutTransfer, WorkUnit};

/// Presigned URL granted for one file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZarrUpload {
    pub path: String,
    pub upload_url: String,
}

#[derive(Debug, Serialize)]
struct CreateZarrRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateZarrResponse {
    zarr_id: String,
}

/// Options of one zarr upload run
#[derive(Debug, Clone)]
pub struct ZarrOptions {
    /// Existing archive; a new one named `name` is created when absent
    pub zarr_id: Option<String>,
    pub name: String,
    pub source_dir: PathBuf,
    pub workers: usize,
    /// Ask the service to finalize the archive after the transfer
    pub complete: bool,
}

impl Default for ZarrOptions {
    fn default() -> Self {
        Self {
            zarr_id: None,
            name: "test_upload".into(),
            source_dir: PathBuf::from("upload"),
            workers: 50,
            complete: false,
        }
    }
}

/// Timings and volume of one zarr upload run
#[derive(Debug, Clone)]
pub struct ZarrReport {
    pub zarr_id: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub initialize: Duration,
    pub upload: Duration,
    pub complete: Option<Duration>,
    pub total: Duration,
}

impl ZarrReport {
    pub fn upload_throughput(&self) -> Throughput {
        Throughput::new(self.total_bytes, self.upload)
    }

    pub fn total_throughput(&self) -> Throughput {
        Throughput::new(self.total_bytes, self.total)
    }
}

/// Client for the zarr endpoints of the coordination service
pub struct ZarrClient {
    api: ApiClient,
    store: StoreConfig,
}

impl ZarrClient {
    /// PUTs carry `X-Amz-ACL: bucket-owner-full-control` on top of `store`'s headers
    pub fn new(api: &ApiConfig, store: StoreConfig) -> Result<Self> {
        let store = store.with_header("X-Amz-ACL", "bucket-owner-full-control");
        Ok(Self {
            api: ApiClient::new(api, &store)?,
            store,
        })
    }

    /// Create an archive and return its id
    pub async fn create_zarr(&self, name: &str) -> Result<String> {
        let resp: CreateZarrResponse = self
            .api
            .post_json("create_zarr", "zarr/", &CreateZarrRequest { name }, StatusCode::OK)
            .await?;
        info!("Created zarr archive {}", resp.zarr_id);
        Ok(resp.zarr_id)
    }

    /// Drop any pending upload of the archive; a missing upload is not an error
    pub async fn cancel_upload(&self, zarr_id: &str) -> Result<()> {
        let status = self
            .api
            .delete("cancel_upload", &format!("zarr/{}/upload/", zarr_id))
            .await?;
        if status.is_success() {
            debug!("Cancelled pending upload of {}", zarr_id);
        } else {
            debug!("No pending upload cancelled for {} (status {})", zarr_id, status);
        }
        Ok(())
    }

    /// Announce the files and receive one presigned URL each
    pub async fn initialize_upload(&self, zarr_id: &str, files: &[SourceFile]) -> Result<Vec<ZarrUpload>> {
        info!("Initializing upload of {} files to {}", files.len(), zarr_id);
        self.api
            .post_json(
                "initialize_zarr_upload",
                &format!("zarr/{}/upload/", zarr_id),
                files,
                StatusCode::OK,
            )
            .await
    }

    /// PUT every granted file; returns the number of bytes sent
    pub async fn upload_files(
        &self,
        source_dir: &Path,
        files: &[SourceFile],
        uploads: Vec<ZarrUpload>,
        workers: usize,
    ) -> Result<u64> {
        let sizes: HashMap<&str, u64> = files.iter().map(|f| (f.path.as_str(), f.size)).collect();

        let mut paths = Vec::with_capacity(uploads.len());
        let mut units = Vec::with_capacity(uploads.len());
        for (idx, upload) in uploads.into_iter().enumerate() {
            let size = *sizes.get(upload.path.as_str()).ok_or_else(|| {
                UploadError::service(
                    "initialize_zarr_upload",
                    Some(200),
                    format!("granted unknown path {}", upload.path),
                )
            })?;
            paths.push(source_dir.join(&upload.path));
            units.push(WorkUnit::new(
                PartDescriptor {
                    number: idx as u32 + 1,
                    offset: 0,
                    size,
                },
                Destination::Presigned { url: upload.upload_url },
            ));
        }

        info!("Uploading {} files with {} workers", units.len(), workers);
        let payload = PayloadSource::Files(Arc::new(paths));
        let store = &self.store;
        let factory =
            || -> Result<PresignedPutTransfer> { PresignedPutTransfer::new(store, payload.clone()) };

        let results = TransferPool::with_concurrency(workers)
            .run(units, &factory)
            .await?
            .into_results()?;

        let total: u64 = results.iter().map(|r| r.size).sum();
        info!("Finished uploading {:.3} MB", total as f64 / 1_000_000.0);
        Ok(total)
    }

    /// Finalize the archive; the service answers 201
    pub async fn complete_upload(&self, zarr_id: &str) -> Result<()> {
        info!("Completing the upload of {}", zarr_id);
        self.api
            .post_empty(
                "complete_zarr_upload",
                &format!("zarr/{}/upload/complete/", zarr_id),
                StatusCode::CREATED,
            )
            .await
    }

    /// Full run: create or reuse the archive, then initialize, upload and optionally complete
    pub async fn run(&self, options: &ZarrOptions) -> Result<ZarrReport> {
        let zarr_id = match &options.zarr_id {
            Some(id) => id.clone(),
            None => self.create_zarr(&options.name).await?,
        };

        let files = scan_source_files(&options.source_dir).await?;
        if files.is_empty() {
            warn!("No files found under {}", options.source_dir.display());
        }

        self.cancel_upload(&zarr_id).await?;

        let mut timer = Timer::start();
        let uploads = self.initialize_upload(&zarr_id, &files).await?;
        let initialize = timer.mark();

        let total_bytes = self
            .upload_files(&options.source_dir, &files, uploads, options.workers)
            .await?;
        let upload = timer.mark();

        let complete = if options.complete {
            self.complete_upload(&zarr_id).await?;
            Some(timer.mark())
        } else {
            None
        };

        Ok(ZarrReport {
            zarr_id,
            file_count: files.len(),
            total_bytes,
            initialize,
            upload,
            complete,
            total: timer.total(),
        })
    }
}
