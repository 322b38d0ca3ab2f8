//! Client and per-request options.

use std::time::Duration;

use crate::store::{ConsistencyLevel, PartitionKey, RequestOptions};

/// Default number of bulk operations in flight at once.
pub const DEFAULT_BULK_CONCURRENCY: usize = 500;

/// Options applied to every request of an [`EncryptionClient`](crate::EncryptionClient).
#[derive(Debug, Clone, Default)]
pub struct EncryptionClientOptions {
    /// Timeout for requests that do not set their own (`None` = no timeout).
    pub default_timeout: Option<Duration>,
    /// Age after which a resolved client encryption key is fetched and
    /// unwrapped again (`None` = until invalidated). Ignored when the client
    /// is built with a caller-supplied cache.
    pub key_cache_ttl: Option<Duration>,
}

/// Options for a single point, patch or batch request.
#[derive(Debug, Clone, Default)]
pub struct ItemRequestOptions {
    /// Forwarded to the database client unchanged.
    pub request: RequestOptions,
    pub timeout: Option<Duration>,
}

impl ItemRequestOptions {
    pub fn with_content_response_on_write(mut self, enabled: bool) -> Self {
        self.request.content_response_on_write = enabled;
        self
    }

    pub fn with_if_match_etag(mut self, etag: impl Into<String>) -> Self {
        self.request.if_match_etag = Some(etag.into());
        self
    }

    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.request.consistency_level = Some(level);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Page size (`None` = one page with every result).
    pub max_item_count: Option<usize>,
    pub partition_key: Option<PartitionKey>,
    pub consistency_level: Option<ConsistencyLevel>,
    /// Resume from a continuation token of an earlier page.
    pub continuation: Option<String>,
    /// Applies to each page fetch.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeFeedOptions {
    pub max_item_count: Option<usize>,
    pub partition_key: Option<PartitionKey>,
    /// Start after this token (`None` = from the beginning).
    pub continuation: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct BulkExecutionOptions {
    /// Operations in flight at once.
    pub max_concurrency: usize,
    /// Applied to every operation.
    pub item_options: ItemRequestOptions,
}

impl Default for BulkExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_BULK_CONCURRENCY,
            item_options: ItemRequestOptions::default(),
        }
    }
}
