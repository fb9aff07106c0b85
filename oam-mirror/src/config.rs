//! Run configuration sourced from named environment values.
//!
//! The recognized values are the blob store credentials and location
//! (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_BUCKET_NAME`,
//! `AWS_REGION`, `S3_ENDPOINT_URL`), the secondary database connection string
//! (`DATABASE_URL`) and the contributor tracking cutoff
//! (`CONTRIBUTOR_TRACKING_START`). Everything else is a code-level default.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{MirrorError, Result};
use crate::security::{redact_connection_string, SecureString};

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_BUCKET_NAME: &str = "AWS_BUCKET_NAME";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_ENDPOINT_URL: &str = "S3_ENDPOINT_URL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_TRACKING_START: &str = "CONTRIBUTOR_TRACKING_START";

const DEFAULT_REGION: &str = "us-east-1";

/// Blob store location and credentials.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    bucket: String,
    region: String,
    access_key_id: String,
    secret_access_key: SecureString,
    endpoint: Option<String>,
}

impl StoreConfig {
    /// Creates a store configuration for the given bucket and credentials.
    pub fn new(
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            access_key_id: access_key_id.into(),
            secret_access_key: SecureString::new(secret_access_key.into()),
            endpoint: None,
        }
    }

    /// Set the bucket region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Point the client at an S3-compatible endpoint instead of AWS.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret key. Avoid storing or logging the exposed value.
    pub fn secret_access_key(&self) -> &SecureString {
        &self.secret_access_key
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

/// Everything a run reads from its environment.
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    /// Blob store settings; `None` when the bucket variables are absent.
    pub store: Option<StoreConfig>,
    /// Secondary database connection string.
    pub database_url: Option<SecureString>,
    /// First instant for which contributor history is complete.
    pub tracking_start: Option<DateTime<Utc>>,
    missing_store_vars: Vec<&'static str>,
}

impl MirrorConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Reads configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store = match (
            get(ENV_BUCKET_NAME),
            get(ENV_ACCESS_KEY_ID),
            get(ENV_SECRET_ACCESS_KEY),
        ) {
            (Some(bucket), Some(key_id), Some(secret)) => {
                let mut store = StoreConfig::new(bucket, key_id, secret)
                    .with_region(get(ENV_REGION).unwrap_or_else(|| DEFAULT_REGION.to_string()));
                if let Some(endpoint) = get(ENV_ENDPOINT_URL) {
                    store = store.with_endpoint(endpoint);
                }
                Some(store)
            }
            _ => None,
        };

        let missing_store_vars = [ENV_ACCESS_KEY_ID, ENV_SECRET_ACCESS_KEY, ENV_BUCKET_NAME]
            .into_iter()
            .filter(|name| get(*name).is_none())
            .collect();

        let tracking_start = get(ENV_TRACKING_START)
            .map(|raw| parse_cutoff(&raw))
            .transpose()?;

        Ok(Self {
            store,
            database_url: get(ENV_DATABASE_URL).map(SecureString::new),
            tracking_start,
            missing_store_vars,
        })
    }

    /// Returns the store configuration or an error naming every missing variable.
    pub fn require_store(&self) -> Result<&StoreConfig> {
        self.store.as_ref().ok_or_else(|| {
            MirrorError::Configuration(format!(
                "Missing required environment variables: {}",
                self.missing_store_vars.join(", ")
            ))
        })
    }

    /// Returns the database connection string or a configuration error.
    pub fn require_database_url(&self) -> Result<&SecureString> {
        self.database_url.as_ref().ok_or_else(|| {
            MirrorError::Configuration(format!(
                "Missing required environment variable: {ENV_DATABASE_URL}"
            ))
        })
    }

    /// Database connection string with credentials masked, for logging.
    pub fn database_description(&self) -> Option<String> {
        self.database_url
            .as_ref()
            .map(|url| redact_connection_string(url.expose()))
    }
}

/// Parses the tracking cutoff as RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
fn parse_cutoff(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            MirrorError::Configuration(format!(
                "{ENV_TRACKING_START} must be RFC 3339 or YYYY-MM-DD, got '{raw}'"
            ))
        })
}
