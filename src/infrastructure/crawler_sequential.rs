use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use log::{error, info, warn};

use crate::{
    CrawlReport, CrawlStatus, CrawlerError, DateRangePartition, FetchCursor, MAX_PAGE_SIZE,
    PartitionFailurePolicy, PartitionPlanner, RepositoryCrawler, RepositoryFetcher,
    RepositoryPersister, Sleeper, StdResult, TokioSleeper,
};

/// How the paging of a partition ended.
#[derive(Debug, PartialEq, Eq)]
enum PartitionOutcome {
    /// No more reachable results in the partition.
    Exhausted,
    /// The crawl target was reached while paging the partition.
    TargetReached,
}

/// A sequential crawler, processing one partition, one page and one attempt at a time.
pub struct SequentialCrawler {
    fetcher: Arc<dyn RepositoryFetcher>,
    persister: Arc<dyn RepositoryPersister>,
    page_size: u16,
    base_query: String,
    on_partition_failure: PartitionFailurePolicy,
    /// The delay between two consecutive requests
    delay_between_requests: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl SequentialCrawler {
    /// Creates a new `SequentialCrawler` instance with the given fetcher and persister.
    pub fn new(
        fetcher: Arc<dyn RepositoryFetcher>,
        persister: Arc<dyn RepositoryPersister>,
    ) -> Self {
        Self {
            fetcher,
            persister,
            page_size: MAX_PAGE_SIZE,
            base_query: "is:public".to_string(),
            on_partition_failure: PartitionFailurePolicy::default(),
            delay_between_requests: Duration::ZERO,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Sets the number of repositories requested per page.
    pub fn with_page_size(mut self, page_size: u16) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Sets the search filter combined with each partition's date range.
    pub fn with_base_query(mut self, base_query: &str) -> Self {
        self.base_query = base_query.to_string();
        self
    }

    /// Sets the behavior when a partition cannot be fetched.
    pub fn with_partition_failure_policy(mut self, policy: PartitionFailurePolicy) -> Self {
        self.on_partition_failure = policy;
        self
    }

    /// Sets the pause between two consecutive requests, waited with the given sleeper.
    pub fn with_delay_between_requests(
        mut self,
        delay_between_requests: Duration,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        self.delay_between_requests = delay_between_requests;
        self.sleeper = sleeper;
        self
    }

    fn into_partition_fetch_failure(
        error: anyhow::Error,
        partition: &DateRangePartition,
    ) -> CrawlerError {
        match error.downcast::<CrawlerError>() {
            Ok(error) => error,
            Err(error) => CrawlerError::PartitionFetchFailed {
                partition: partition.to_owned(),
                attempts: 1,
                message: format!("{error:#}"),
            },
        }
    }

    async fn crawl_partition(
        &self,
        partition: &DateRangePartition,
        report: &mut CrawlReport,
    ) -> Result<PartitionOutcome, CrawlerError> {
        let mut cursor = FetchCursor::default();
        while let Some(request) = cursor.next_request(&self.base_query, partition, self.page_size)
        {
            if report.total_fetcher_calls > 0 && !self.delay_between_requests.is_zero() {
                self.sleeper.sleep(self.delay_between_requests).await;
            }
            info!("Processing request: {request}");
            report.total_fetcher_calls += 1;
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| Self::into_partition_fetch_failure(e, partition))?;
            report.api_rate_limit = response.rate_limit().to_owned();
            let fetched = response.repositories().len();
            cursor.advance(
                fetched as u32,
                response.has_next_page(),
                response.end_cursor().map(str::to_owned),
            );

            let repositories =
                &response.repositories()[..fetched.min(report.remaining_repositories() as usize)];
            if repositories.is_empty() {
                info!("No repositories found for request: {request}");
            } else {
                for repository in repositories {
                    info!("Fetched {repository}");
                }
                let outcome = self
                    .persister
                    .persist(repositories)
                    .await
                    .map_err(|e| CrawlerError::Persistence(format!("{e:#}")))?;
                report.record_batch(repositories.len() as u32, outcome);
            }
            warn!("{report}");

            if report.has_reached_target() {
                return Ok(PartitionOutcome::TargetReached);
            }
        }
        info!(
            "Partition {partition} exhausted after {} repositories",
            cursor.fetched()
        );

        Ok(PartitionOutcome::Exhausted)
    }
}

#[async_trait::async_trait]
impl RepositoryCrawler for SequentialCrawler {
    async fn crawl(
        &self,
        planner: &PartitionPlanner,
        total_repositories: u32,
    ) -> StdResult<CrawlReport> {
        if total_repositories == 0 {
            return Err(anyhow!(CrawlerError::Configuration(
                "At least one repository must be requested".to_string()
            )));
        }

        let mut report = CrawlReport::new(total_repositories);
        for partition in planner {
            info!("Processing partition {partition}");
            report.current_partition = Some(partition.clone());
            match self.crawl_partition(&partition, &mut report).await {
                Ok(PartitionOutcome::TargetReached) => {
                    report.status = CrawlStatus::Success;
                    info!("Target reached: {report}");
                    return Ok(report);
                }
                Ok(PartitionOutcome::Exhausted) => report.partitions_completed += 1,
                Err(error @ CrawlerError::PartitionFetchFailed { .. })
                    if self.on_partition_failure == PartitionFailurePolicy::Skip =>
                {
                    warn!("Skipping partition {partition}: {error}");
                    report.partitions_skipped += 1;
                }
                Err(error) => {
                    error!("Crawl aborted: {error}");
                    report.status = CrawlStatus::Failed(error.to_string());
                    return Ok(report);
                }
            }
        }

        report.current_partition = None;
        report.status = if report.partitions_skipped > 0 {
            CrawlStatus::Partial(format!(
                "{} partitions skipped after fetch failures",
                report.partitions_skipped
            ))
        } else {
            CrawlStatus::Partial(format!(
                "all partitions exhausted with {}/{} repositories",
                report.total_fetched_repositories, report.total_repositories_target
            ))
        };
        warn!("Crawl completed without reaching the target: {report}");

        Ok(report)
    }
}
