//! Coordination service client
//!
//! The service hands out an upload id plus one presigned destination per
//! part, and turns the collected part etags into a completion request that
//! is replayed against the object store.

use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ApiConfig, Digest, StoreConfig};
use crate::error::{Result, UploadError};
use crate::plan::PartPlan;
use crate::storage::{store_http_client, Destination, PartResult};

/// Body of the initialize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub content_size: u64,
    pub digest: Digest,
    pub dandiset: String,
}

/// Destination granted for one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedPart {
    pub part_number: u32,
    pub size: u64,
    pub destination: Destination,
}

/// Answer to a successful initialize call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadGrant {
    pub upload_id: String,
    pub parts: Vec<GrantedPart>,
}

/// Presigned request that finishes the upload on the object store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignedCompletion {
    pub complete_url: String,
    #[serde(default)]
    pub body: String,
}

/// What the service answered to the complete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Nothing left to do
    Finalized,
    /// Must be replayed against the object store
    Presigned(PresignedCompletion),
}

/// Metadata service driving an upload session
pub trait CoordinationService: Send + Sync {
    /// Open an upload.
    ///
    /// `plan` is the locally computed layout; services that do not plan
    /// themselves grant one destination per part of it.
    fn initialize(
        &self,
        request: &InitializeRequest,
        plan: &PartPlan,
    ) -> impl Future<Output = Result<UploadGrant>> + Send;

    /// Submit the transferred parts, sorted by part number
    fn complete(
        &self,
        upload_id: &str,
        parts: &[PartResult],
    ) -> impl Future<Output = Result<Completion>> + Send;

    /// Replay a presigned completion against the object store
    fn finalize(&self, completion: &PresignedCompletion) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    upload_id: String,
    parts: Vec<PresignedPart>,
}

#[derive(Debug, Deserialize)]
struct PresignedPart {
    part_number: u32,
    size: u64,
    upload_url: String,
}

#[derive(Debug, Serialize)]
struct CompleteRequest<'a> {
    parts: &'a [PartResult],
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    complete_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// HTTP/JSON client for the coordination service
pub struct ApiClient {
    http: Client,
    store: Client,
    api_root: String,
}

impl ApiClient {
    /// Create a client; `store` configures the client used for presigned completions
    pub fn new(config: &ApiConfig, store: &StoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("token {}", key))
                .map_err(|e| UploadError::configuration(format!("invalid api key: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| UploadError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            store: store_http_client(store)?,
            api_root: config.api_root.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL for a path under `/api/`
    pub fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.api_root, path.trim_start_matches('/'))
    }

    pub(crate) async fn post_json<B, R>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
        expected: StatusCode,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| UploadError::service(operation, None, e.to_string()))?;
        let resp = check_status(operation, resp, expected).await?;

        resp.json::<R>()
            .await
            .map_err(|e| UploadError::service(operation, Some(expected.as_u16()), format!("invalid response: {}", e)))
    }

    pub(crate) async fn post_empty(&self, operation: &'static str, path: &str, expected: StatusCode) -> Result<()> {
        let resp = self
            .http
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| UploadError::service(operation, None, e.to_string()))?;
        check_status(operation, resp, expected).await?;
        Ok(())
    }

    /// DELETE a path; returns the response status without judging it
    pub(crate) async fn delete(&self, operation: &'static str, path: &str) -> Result<StatusCode> {
        let resp = self
            .http
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| UploadError::service(operation, None, e.to_string()))?;
        Ok(resp.status())
    }
}

async fn check_status(operation: &'static str, resp: Response, expected: StatusCode) -> Result<Response> {
    if resp.status() == expected {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(UploadError::service(operation, Some(status.as_u16()), body))
}

impl CoordinationService for ApiClient {
    async fn initialize(&self, request: &InitializeRequest, _plan: &PartPlan) -> Result<UploadGrant> {
        let resp: InitializeResponse = self
            .post_json("initialize", "uploads/initialize/", request, StatusCode::OK)
            .await?;

        info!(
            "Initialized upload {} of {:.3} MB in {} parts",
            resp.upload_id,
            request.content_size as f64 / 1_000_000.0,
            resp.parts.len()
        );

        Ok(UploadGrant {
            upload_id: resp.upload_id,
            parts: resp
                .parts
                .into_iter()
                .map(|p| GrantedPart {
                    part_number: p.part_number,
                    size: p.size,
                    destination: Destination::Presigned { url: p.upload_url },
                })
                .collect(),
        })
    }

    async fn complete(&self, upload_id: &str, parts: &[PartResult]) -> Result<Completion> {
        let path = format!("uploads/{}/complete/", upload_id);
        let resp: CompleteResponse = self
            .post_json("complete", &path, &CompleteRequest { parts }, StatusCode::OK)
            .await?;

        Ok(match resp.complete_url {
            Some(complete_url) => Completion::Presigned(PresignedCompletion {
                complete_url,
                body: resp.body.unwrap_or_default(),
            }),
            None => Completion::Finalized,
        })
    }

    async fn finalize(&self, completion: &PresignedCompletion) -> Result<()> {
        let resp = self
            .store
            .post(&completion.complete_url)
            .body(completion.body.clone())
            .send()
            .await
            .map_err(|e| UploadError::Completion {
                status: 0,
                message: e.to_string(),
            })?;

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(UploadError::Completion { status, message });
        }

        debug!("Object store accepted completion request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_request_wire_format() {
        let request = InitializeRequest {
            content_size: 10_000_000,
            digest: Digest::default(),
            dandiset: "000001".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contentSize"], 10_000_000);
        assert_eq!(json["digest"]["algorithm"], "dandi:dandi-etag");
        assert_eq!(json["dandiset"], "000001");
    }

    #[test]
    fn test_complete_request_wire_format() {
        let parts = vec![PartResult::new(1, 100, "a"), PartResult::new(2, 50, "b")];
        let json = serde_json::to_value(CompleteRequest { parts: &parts }).unwrap();
        assert_eq!(json["parts"][1]["part_number"], 2);
        assert_eq!(json["parts"][1]["etag"], "b");
    }

    #[test]
    fn test_complete_response_without_url() {
        let resp: CompleteResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.complete_url.is_none());
    }

    #[test]
    fn test_url_joining() {
        let config = ApiConfig {
            api_root: "https://api.example.org/".into(),
            ..Default::default()
        };
        let client = ApiClient::new(&config, &StoreConfig::default()).unwrap();
        assert_eq!(
            client.url("/uploads/initialize/"),
            "https://api.example.org/api/uploads/initialize/"
        );
    }
}
