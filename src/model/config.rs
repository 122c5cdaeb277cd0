use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{CrawlerError, Granularity, MAX_PAGE_SIZE, PartitionPlanner};

/// What the crawler does when a partition cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PartitionFailurePolicy {
    /// Stop the whole crawl.
    #[default]
    Abort,
    /// Log the failure and move on to the next partition.
    Skip,
}

/// Retry settings for transient fetch failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts for a single request.
    pub max_attempts: u32,

    /// The delay unit for exponential backoff.
    pub base_delay: Duration,

    /// Whether a random delay of up to one `base_delay` is added to each backoff.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before the retry following the `failures`-th failed attempt (`base_delay * 2^(failures-1)`).
    ///
    /// Saturates at [`Duration::MAX`].
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);

        self.base_delay
            .checked_mul(2u32.pow(exponent))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: false,
        }
    }
}

/// The validated settings of a crawl run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerConfig {
    /// Inclusive start of the creation date window.
    pub start: DateTime<Utc>,

    /// Exclusive end of the creation date window.
    pub end: DateTime<Utc>,

    /// Width of the date range partitions.
    pub granularity: Granularity,

    /// Total repositories to crawl.
    pub total_repositories: u32,

    /// Maximum number of repositories fetched per request.
    pub page_size: u16,

    /// Search filter combined with the creation date range of each partition.
    pub base_query: String,

    /// Retry settings of the fetcher.
    pub retry: RetryPolicy,

    /// Remaining quota at or below which the fetcher waits for the reset.
    pub rate_limit_threshold: i32,

    /// Pause between two consecutive search requests.
    pub delay_between_requests: Duration,

    /// Behavior on partition fetch failure.
    pub on_partition_failure: PartitionFailurePolicy,
}

impl CrawlerConfig {
    /// Checks the settings, failing fast before any network activity.
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if self.start >= self.end {
            return Err(CrawlerError::Configuration(format!(
                "start date {} must be before end date {}",
                self.start, self.end
            )));
        }
        if self.granularity.step == 0 {
            return Err(CrawlerError::Configuration(
                "granularity step must be at least 1".to_string(),
            ));
        }
        if self.total_repositories == 0 {
            return Err(CrawlerError::Configuration(
                "total repositories must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(CrawlerError::Configuration(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(CrawlerError::Configuration(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_threshold < 0 {
            return Err(CrawlerError::Configuration(format!(
                "rate limit threshold must not be negative, got {}",
                self.rate_limit_threshold
            )));
        }

        Ok(())
    }

    /// The partition planner covering the configured window.
    pub fn planner(&self) -> PartitionPlanner {
        PartitionPlanner::new(self.start, self.end, self.granularity)
    }

    #[cfg(test)]
    /// Creates a dummy configuration crawling the first two months of 2019.
    pub(crate) fn dummy() -> Self {
        Self {
            start: DateTime::parse_from_rfc3339("2019-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            end: DateTime::parse_from_rfc3339("2019-03-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            granularity: Granularity::monthly(),
            total_repositories: 100,
            page_size: 100,
            base_query: "is:public".to_string(),
            retry: RetryPolicy::default(),
            rate_limit_threshold: 1,
            delay_between_requests: Duration::ZERO,
            on_partition_failure: PartitionFailurePolicy::Abort,
        }
    }
}
