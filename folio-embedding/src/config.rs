use folio_reactive::RetryPolicy;
use std::time::Duration;

/// Largest page the store accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Embedding entity configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Delay between progress fetches
    pub poll_interval: Duration,
    /// Page size for the listing refresh after a write
    pub page_size: u32,
    /// Cap on the merged attachment view
    pub merged_limit: usize,
    /// Retry policy for reads and the enable / ignored-docs writes
    pub retry: RetryPolicy,
    /// Fetch everything and start polling on construction
    pub load_on_open: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            page_size: 10,
            merged_limit: 10,
            retry: RetryPolicy::default(),
            load_on_open: true,
        }
    }
}

impl EmbeddingConfig {
    /// No retries, nothing loaded on construction.
    pub fn for_testing() -> Self {
        Self {
            retry: RetryPolicy::none(),
            load_on_open: false,
            ..Self::default()
        }
    }
}
