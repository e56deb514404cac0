//! Digestion of a stored object into per-part objects
//!
//! Instead of a remote service, the upload id is generated locally and every
//! planned part is granted a range copy out of the source object.

use tracing::info;

use super::api::{
    Completion, CoordinationService, GrantedPart, InitializeRequest, PresignedCompletion, UploadGrant,
};
use super::uploader::UploadCoordinator;
use crate::config::{CopyConfig, UploadConfig};
use crate::error::Result;
use crate::plan::PartPlan;
use crate::report::{SweepRow, UploadReport};
use crate::storage::{load_s3_config, Destination, PartResult, RangeCopyTransfer};

/// Default number of concurrent copies
pub const DEFAULT_COPY_CONCURRENCY: usize = 50;

/// Grants range copies of one source object
#[derive(Debug, Clone)]
pub struct DigestionService {
    bucket: String,
    source_key: String,
}

impl DigestionService {
    pub fn new(bucket: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            source_key: source_key.into(),
        }
    }

    pub fn from_config(config: &CopyConfig) -> Self {
        Self::new(config.bucket.clone(), config.source_key.clone())
    }
}

impl CoordinationService for DigestionService {
    async fn initialize(&self, request: &InitializeRequest, plan: &PartPlan) -> Result<UploadGrant> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Digesting {}/{} ({} bytes) into {} parts",
            self.bucket,
            self.source_key,
            request.content_size,
            plan.len()
        );

        Ok(UploadGrant {
            upload_id,
            parts: plan
                .iter()
                .map(|part| GrantedPart {
                    part_number: part.number,
                    size: part.size,
                    destination: Destination::RangeCopy {
                        bucket: self.bucket.clone(),
                        source_key: self.source_key.clone(),
                    },
                })
                .collect(),
        })
    }

    async fn complete(&self, _upload_id: &str, _parts: &[PartResult]) -> Result<Completion> {
        // every part object was completed by its own copy
        Ok(Completion::Finalized)
    }

    async fn finalize(&self, _completion: &PresignedCompletion) -> Result<()> {
        Ok(())
    }
}

/// Digest the first `total_size` bytes of the configured source object
pub async fn run_digestion(copy: &CopyConfig, upload: UploadConfig, total_size: u64) -> Result<UploadReport> {
    let s3_config = load_s3_config(copy).await?;
    let key_prefix = copy.key_prefix.clone();
    let factory = move || -> Result<RangeCopyTransfer> {
        Ok(RangeCopyTransfer::new(&s3_config, key_prefix.clone()))
    };

    let coordinator = UploadCoordinator::new(DigestionService::from_config(copy), factory, upload);
    coordinator.upload(total_size).await
}

/// Digest once per worker count in `1..=max_workers`
pub async fn run_sweep(
    copy: &CopyConfig,
    upload: UploadConfig,
    total_size: u64,
    max_workers: usize,
) -> Result<Vec<SweepRow>> {
    let mut rows = Vec::with_capacity(max_workers);
    for workers in 1..=max_workers {
        let report = run_digestion(copy, upload.clone().with_concurrency(workers), total_size).await?;
        let row = SweepRow::new(workers, &report);
        info!(
            "workers={} parts={} total={:.4}s avg_part={:.4}s avg_copy={:.4}s",
            workers,
            report.part_count(),
            row.total_time,
            row.avg_part_time,
            row.avg_copy_part_time
        );
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Digest;
    use crate::plan::{plan_parts, PartLimits};

    #[tokio::test]
    async fn test_grants_one_copy_per_part() {
        let service = DigestionService::new("bucket", "blobs/src");
        let plan = plan_parts(1000, 300, &PartLimits::default()).unwrap();
        let request = InitializeRequest {
            content_size: 1000,
            digest: Digest::default(),
            dandiset: "000001".into(),
        };

        let grant = service.initialize(&request, &plan).await.unwrap();
        assert_eq!(grant.parts.len(), 4);
        assert_eq!(grant.parts[3].size, 100);
        assert!(uuid::Uuid::parse_str(&grant.upload_id).is_ok());
        assert!(grant
            .parts
            .iter()
            .all(|p| p.destination.kind() == "range-copy"));
    }

    #[tokio::test]
    async fn test_complete_is_final() {
        let service = DigestionService::new("bucket", "blobs/src");
        let completion = service.complete("id", &[]).await.unwrap();
        assert_eq!(completion, Completion::Finalized);
    }
}
