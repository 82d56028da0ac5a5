use crate::backoff::BackoffConfig;
use std::time::Duration;

/// Tuning shared by every cluster worker.
#[derive(Debug, Clone)]
pub struct SynchroConfig {
    pub backoff: BackoffConfig,
    /// Extra attempts for a failed storage write before the kind errors out.
    pub write_retries: u32,
    pub write_retry_delay: Duration,
    /// Page size requested from the cluster while listing.
    pub list_page_size: usize,
    /// How long a stopping worker may take before it is aborted.
    pub shutdown_timeout: Duration,
    /// How long deleted objects are kept as tombstones.
    pub tombstone_retention: Duration,
    /// Period of the tombstone purge. Zero disables purging.
    pub purge_interval: Duration,
}

impl Default for SynchroConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            write_retries: 3,
            write_retry_delay: Duration::from_millis(100),
            list_page_size: 500,
            shutdown_timeout: Duration::from_secs(30),
            tombstone_retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(10 * 60),
        }
    }
}
