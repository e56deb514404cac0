//! Direct part uploads to presigned URLs
//!
//! Pure reqwest client; the URL carries the authorization so no request
//! signing happens here.

use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, ETAG};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::part::{Destination, PartResult, PartTimings, PartTransfer, WorkUnit};
use super::payload::PayloadSource;
use crate::config::StoreConfig;
use crate::error::{Result, UploadError};

/// Build a reqwest client for object-store requests
pub fn store_http_client(config: &StoreConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| UploadError::configuration(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| UploadError::configuration(format!("invalid header value {}: {}", value, e)))?;
        headers.insert(name, value);
    }

    Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
        .build()
        .map_err(|e| UploadError::configuration(format!("Failed to create HTTP client: {}", e)))
}

/// PUTs each part's bytes to its presigned URL
pub struct PresignedPutTransfer {
    client: Client,
    payload: PayloadSource,
}

impl PresignedPutTransfer {
    /// Create a transfer client with its own connection pool
    pub fn new(config: &StoreConfig, payload: PayloadSource) -> Result<Self> {
        Ok(Self {
            client: store_http_client(config)?,
            payload,
        })
    }

    async fn put(&self, part_number: u32, url: &str, body: Bytes) -> Result<String> {
        let size = body.len();
        let resp = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::transfer(part_number, format!("PUT failed: {}", e)))?;

        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(UploadError::transfer_status(
                part_number,
                status.as_u16(),
                format!("PUT returned status {}: {}", status, detail),
            ));
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UploadError::transfer_status(part_number, 200, "response has no etag header"))?
            .to_string();

        Ok(etag)
    }
}

impl PartTransfer for PresignedPutTransfer {
    async fn transfer(&self, unit: WorkUnit) -> Result<PartResult> {
        let part = unit.part;
        let url = match unit.destination {
            Destination::Presigned { url } => url,
            other => {
                return Err(UploadError::configuration(format!(
                    "part {} has a {} destination, expected presigned",
                    part.number,
                    other.kind()
                )))
            }
        };

        let start = Instant::now();
        let body = self.payload.read(&part).await?;
        debug!(
            "Uploading part {} of size {:.3} MB",
            part.number,
            part.size as f64 / 1_000_000.0
        );
        let etag = self.put(part.number, &url, body).await?;

        debug!("Part {} uploaded, etag={}", part.number, etag);
        Ok(PartResult::new(part.number, part.size, etag).with_timings(PartTimings {
            total: start.elapsed(),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PartDescriptor;

    #[test]
    fn test_invalid_header_rejected() {
        let config = StoreConfig::default().with_header("bad header", "x");
        assert!(matches!(
            store_http_client(&config),
            Err(UploadError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_destination_kind() {
        let transfer = PresignedPutTransfer::new(&StoreConfig::default(), PayloadSource::Random).unwrap();
        let unit = WorkUnit::new(
            PartDescriptor {
                number: 1,
                offset: 0,
                size: 8,
            },
            Destination::RangeCopy {
                bucket: "b".into(),
                source_key: "k".into(),
            },
        );
        let err = transfer.transfer(unit).await.unwrap_err();
        assert!(matches!(err, UploadError::Configuration { .. }));
    }
}
