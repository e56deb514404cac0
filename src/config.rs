//! Configuration for uploads, the coordination service and the object store

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::PartLimits;
use crate::runtime::{FailurePolicy, PoolConfig};

/// Content fingerprint sent with an initialize request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub algorithm: String,
    pub value: String,
}

impl Default for Digest {
    /// Placeholder etag so random payloads need not be hashed up front
    fn default() -> Self {
        Self {
            algorithm: "dandi:dandi-etag".into(),
            value: "f".repeat(32),
        }
    }
}

/// Coordination service connection settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Service root, e.g. `https://api.example.org`; paths live under `/api`
    pub api_root: String,
    /// Token sent as `Authorization: token <key>`
    pub api_key: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_root: "http://localhost:8000".into(),
            api_key: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

impl ApiConfig {
    /// Read `UPLOAD_API_ROOT` and `UPLOAD_API_KEY`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_root: std::env::var("UPLOAD_API_ROOT").unwrap_or(defaults.api_root),
            api_key: std::env::var("UPLOAD_API_KEY").ok(),
            ..defaults
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for requests sent straight to the object store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Extra headers attached to every store request (e.g. `host`, `X-Amz-ACL`)
    pub extra_headers: Vec<(String, String)>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            extra_headers: Vec::new(),
        }
    }
}

impl StoreConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// Parameters of one upload session
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Target part size in bytes
    pub part_size: u64,
    /// Worker pool settings
    pub pool: PoolConfig,
    /// Store constraints for planning
    pub limits: PartLimits,
    /// Fingerprint announced at initialize
    pub digest: Digest,
    /// Container the object is uploaded into
    pub dandiset: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let limits = PartLimits::default();
        Self {
            part_size: limits.default_part_size,
            pool: PoolConfig::default(),
            limits,
            digest: Digest::default(),
            dandiset: "000001".into(),
        }
    }
}

impl UploadConfig {
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.pool.max_concurrency = max_concurrency;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.pool.failure_policy = policy;
        self
    }
}

/// Server-side copy (digestion) settings
#[derive(Debug, Clone)]
pub struct CopyConfig {
    /// Bucket holding both the source object and the new objects
    pub bucket: String,
    /// Key of the object whose ranges are copied
    pub source_key: String,
    /// Prefix for generated object keys
    pub key_prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint for S3-compatible stores
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            bucket: "dandi-api-benchmark-dandisets".into(),
            source_key: String::new(),
            key_prefix: "blobs".into(),
            region: "us-east-1".into(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl CopyConfig {
    /// Read `S3_BUCKET`, `S3_SOURCE_KEY`, `S3_REGION`, `S3_ENDPOINT` and credentials
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bucket: std::env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            source_key: std::env::var("S3_SOURCE_KEY").unwrap_or(defaults.source_key),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID")
                .or(std::env::var("S3_ACCESS_KEY"))
                .ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .or(std::env::var("S3_SECRET_KEY"))
                .ok(),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_digest() {
        let digest = Digest::default();
        assert_eq!(digest.value.len(), 32);
        assert!(digest.value.chars().all(|c| c == 'f'));
    }

    #[test]
    fn test_upload_config_builders() {
        let config = UploadConfig::default()
            .with_concurrency(50)
            .with_failure_policy(FailurePolicy::StopDispatch);
        assert_eq!(config.pool.max_concurrency, 50);
        assert_eq!(config.pool.failure_policy, FailurePolicy::StopDispatch);
        assert_eq!(config.part_size, 150 * 1024);
    }
}
