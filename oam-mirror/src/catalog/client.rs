use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

use super::retry::{AttemptError, RetryPolicy};
use crate::error::{MirrorError, Result};

/// Public OpenAerialMap API.
pub const DEFAULT_API_BASE: &str = "https://api.openaerialmap.org";
/// Records requested per page.
pub const DEFAULT_PAGE_LIMIT: u64 = 100;

const SOURCE_NAME: &str = "oam-api";
const USER_AGENT: &str = concat!("oam-mirror/", env!("CARGO_PKG_VERSION"));

/// Something that yields every current catalog document.
///
/// Pagination, transport and retries are the implementation's business. The
/// returned order carries no meaning.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Value>>;
}

#[derive(Debug, Deserialize, Default)]
struct MetaPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Deserialize, Default)]
struct PageMeta {
    #[serde(default)]
    found: u64,
}

/// Client for the paginated `/meta` endpoint.
#[derive(Debug, Clone)]
pub struct OamCatalogClient {
    client: Client,
    meta_url: Url,
    page_limit: u64,
    concurrency: usize,
    retry: RetryPolicy,
}

impl OamCatalogClient {
    /// Creates a client for the given API base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| MirrorError::Configuration(format!("Invalid API base URL: {e}")))?;
        let meta_url = base
            .join("meta")
            .map_err(|e| MirrorError::Configuration(format!("Invalid API base URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                MirrorError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            meta_url,
            page_limit: DEFAULT_PAGE_LIMIT,
            concurrency: 4,
            retry: RetryPolicy::default(),
        })
    }

    /// Set the number of records requested per page.
    pub fn with_page_limit(mut self, page_limit: u64) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Set how many pages may be in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, page: u64) -> Result<MetaPage> {
        self.retry
            .run(SOURCE_NAME, || self.request_page(page))
            .await
    }

    async fn request_page(&self, page: u64) -> std::result::Result<MetaPage, AttemptError> {
        let response = self
            .client
            .get(self.meta_url.clone())
            .header("Accept", "application/json")
            .query(&[("page", page), ("limit", self.page_limit)])
            .send()
            .await
            .map_err(|e| AttemptError::retryable(format!("page {page}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = format!("page {page}: HTTP {status}");
            let error = if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                AttemptError::retryable(message)
            } else {
                AttemptError::fatal(message)
            };
            return Err(error.with_retry_after(retry_after));
        }

        response
            .json::<MetaPage>()
            .await
            .map_err(|e| AttemptError::retryable(format!("page {page}: invalid body: {e}")))
    }
}

#[async_trait]
impl RecordSource for OamCatalogClient {
    #[instrument(skip(self), fields(url = %self.meta_url))]
    async fn fetch_all(&self) -> Result<Vec<Value>> {
        let first = self.fetch_page(1).await?;
        let found = first.meta.found;
        let total_pages = found.div_ceil(self.page_limit).max(1);
        info!(found, total_pages, "Fetching catalog pages");

        let mut pages: Vec<(u64, Vec<Value>)> = stream::iter(2..=total_pages)
            .map(|page| async move {
                self.fetch_page(page)
                    .await
                    .map(|body| (page, body.results))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        pages.sort_by_key(|(page, _)| *page);

        // Empty pages may only trail. A gap means a partial catalog.
        if let Some(empty) = pages.iter().position(|(_, results)| results.is_empty()) {
            if let Some((later, _)) = pages[empty..].iter().find(|(_, results)| !results.is_empty()) {
                return Err(MirrorError::transport(
                    SOURCE_NAME,
                    format!(
                        "page {} came back empty but page {later} returned records; refusing a partial catalog",
                        pages[empty].0
                    ),
                    1,
                ));
            }
            warn!(
                page = pages[empty].0,
                "Pages from here to the reported end are empty"
            );
        }

        let mut records = first.results;
        for (_, results) in pages {
            records.extend(results);
        }

        if records.len() as u64 != found {
            warn!(
                fetched = records.len(),
                found, "Fetched record count differs from reported total"
            );
        }
        info!(records = records.len(), "Fetched catalog");
        Ok(records)
    }
}
