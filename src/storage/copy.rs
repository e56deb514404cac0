//! Server-side range copies
//!
//! Each part becomes its own finished object: create a multipart upload on a
//! fresh key, copy the part's byte range out of the source object as part 1,
//! then complete the upload with that single part.

use std::time::Instant;

use aws_sdk_s3::config::{Credentials, Region, SharedCredentialsProvider};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use tracing::debug;

use super::part::{Destination, PartResult, PartTimings, PartTransfer, WorkUnit};
use crate::config::CopyConfig;
use crate::error::{Result, UploadError};

/// Load an S3 client configuration from the environment plus overrides
pub async fn load_s3_config(config: &CopyConfig) -> Result<aws_sdk_s3::Config> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));

    match (&config.access_key_id, &config.secret_access_key) {
        (Some(ak), Some(sk)) => {
            let creds = Credentials::new(ak.clone(), sk.clone(), None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        (None, None) => {}
        _ => {
            return Err(UploadError::configuration(
                "S3 credentials incomplete: both access key and secret key must be provided",
            ))
        }
    }

    let sdk_config = loader.load().await;
    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }
    Ok(builder.build())
}

/// Key for a new object: `{prefix}/{id[0..3]}/{id[3..6]}/{id}`
pub fn new_object_key(prefix: &str) -> String {
    let ident = uuid::Uuid::new_v4().to_string();
    format!("{}/{}/{}/{}", prefix, &ident[..3], &ident[3..6], ident)
}

fn step_failure(part_number: u32, step: &str, err: impl std::error::Error) -> UploadError {
    UploadError::transfer(part_number, format!("{}: {}", step, DisplayErrorContext(err)))
}

/// Copies each part's byte range into a new object
pub struct RangeCopyTransfer {
    client: Client,
    key_prefix: String,
}

impl RangeCopyTransfer {
    /// Create a transfer client with its own S3 client instance
    pub fn new(s3_config: &aws_sdk_s3::Config, key_prefix: impl Into<String>) -> Self {
        Self {
            client: Client::from_conf(s3_config.clone()),
            key_prefix: key_prefix.into(),
        }
    }
}

impl PartTransfer for RangeCopyTransfer {
    async fn transfer(&self, unit: WorkUnit) -> Result<PartResult> {
        let part = unit.part;
        let (bucket, source_key) = match unit.destination {
            Destination::RangeCopy { bucket, source_key } => (bucket, source_key),
            other => {
                return Err(UploadError::configuration(format!(
                    "part {} has a {} destination, expected range-copy",
                    part.number,
                    other.kind()
                )))
            }
        };

        let key = new_object_key(&self.key_prefix);
        if part.number % 10 == 0 {
            debug!("Copying part {} into {}", part.number, key);
        }

        let start = Instant::now();

        let upload_id = self
            .client
            .create_multipart_upload()
            .bucket(&bucket)
            .key(&key)
            .acl(ObjectCannedAcl::BucketOwnerFullControl)
            .send()
            .await
            .map_err(|e| step_failure(part.number, "create multipart upload", e))?
            .upload_id()
            .ok_or_else(|| UploadError::transfer(part.number, "create multipart upload returned no upload id"))?
            .to_string();
        let created = Instant::now();

        let copied = self
            .client
            .upload_part_copy()
            .bucket(&bucket)
            .key(&key)
            .upload_id(&upload_id)
            .copy_source(format!("{}/{}", bucket, source_key))
            .copy_source_range(part.byte_range())
            .part_number(1)
            .send()
            .await
            .map_err(|e| step_failure(part.number, "upload part copy", e))?;
        let etag = copied
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .ok_or_else(|| UploadError::transfer(part.number, "upload part copy returned no etag"))?
            .trim_matches('"')
            .to_string();
        let copied_at = Instant::now();

        let completed = CompletedMultipartUpload::builder()
            .parts(CompletedPart::builder().e_tag(&etag).part_number(1).build())
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&bucket)
            .key(&key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| step_failure(part.number, "complete multipart upload", e))?;
        let finished = Instant::now();

        let timings = PartTimings {
            total: finished - start,
            create_upload: Some(created - start),
            copy_part: Some(copied_at - created),
            complete_upload: Some(finished - copied_at),
        };

        Ok(PartResult::new(part.number, part.size, etag).with_timings(timings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let key = new_object_key("blobs");
        let segments: Vec<&str> = key.split('/').collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], "blobs");
        assert_eq!(segments[1].len(), 3);
        assert_eq!(segments[2].len(), 3);
        assert!(segments[3].starts_with(segments[1]));
        assert_eq!(&segments[3][3..6], segments[2]);
    }

    #[tokio::test]
    async fn test_incomplete_credentials_rejected() {
        let config = CopyConfig {
            access_key_id: Some("AKIA".into()),
            ..Default::default()
        };
        assert!(matches!(
            load_s3_config(&config).await,
            Err(UploadError::Configuration { .. })
        ));
    }
}
