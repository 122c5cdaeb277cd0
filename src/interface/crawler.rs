use crate::{CrawlReport, PartitionPlanner, StdResult};

/// A trait for retrieving GitHub repositories and associated metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepositoryCrawler {
    /// Crawl the GitHub API for repositories over the planned partitions.
    async fn crawl(
        &self,
        planner: &PartitionPlanner,
        total_repositories: u32,
    ) -> StdResult<CrawlReport>;
}
