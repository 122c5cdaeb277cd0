use std::{fmt::Display, ops::Deref, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{DateRangePartition, StdResult};

/// The name of a repository.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepositoryName(pub String);

impl Deref for RepositoryName {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for RepositoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The login of the account or organization owning a repository.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerName(pub String);

impl Deref for OwnerName {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for OwnerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The number of stars a repository has.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarsCounter(pub u32);

impl Deref for StarsCounter {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for StarsCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository as returned by the search API, normalized for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// The login of the repository owner.
    owner_name: OwnerName,

    /// The short name of the repository.
    repo_name: RepositoryName,

    /// The number of stars at fetch time.
    stars: StarsCounter,

    /// The creation time of the repository.
    created_at: DateTime<Utc>,
}

impl RepositoryRecord {
    /// Creates a new `RepositoryRecord` instance.
    pub fn new(owner_name: &str, repo_name: &str, stars: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            owner_name: OwnerName(owner_name.to_string()),
            repo_name: RepositoryName(repo_name.to_string()),
            stars: StarsCounter(stars),
            created_at,
        }
    }

    /// Retrieves the owner name.
    pub fn owner_name(&self) -> &OwnerName {
        &self.owner_name
    }

    /// Retrieves the repository name.
    pub fn repo_name(&self) -> &RepositoryName {
        &self.repo_name
    }

    /// Retrieves the star count.
    pub fn stars(&self) -> &StarsCounter {
        &self.stars
    }

    /// Retrieves the creation time.
    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    /// A record is only persistable when both parts of its key are non-empty.
    pub fn has_valid_key(&self) -> bool {
        !self.owner_name.is_empty() && !self.repo_name.is_empty()
    }

    #[cfg(test)]
    /// Creates a dummy `RepositoryRecord` for testing purposes.
    pub(crate) fn dummy(owner_name: &str, repo_name: &str, stars: u32) -> Self {
        Self::new(
            owner_name,
            repo_name,
            stars,
            DateTime::parse_from_rfc3339("2019-01-15T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }
}

impl Display for RepositoryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Repository: {}/{}, Stars: {}, Created: {}",
            self.owner_name,
            self.repo_name,
            self.stars,
            self.created_at.to_rfc3339()
        )
    }
}

/// A row of the repositories table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRepository {
    pub id: i64,
    pub owner_name: String,
    pub repo_name: String,
    pub stars: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

/// The outcome of persisting a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Records that created a new row.
    pub inserted: u32,

    /// Records that updated an existing row.
    pub updated: u32,
}

impl PersistOutcome {
    /// Total number of records written.
    pub fn total(&self) -> u32 {
        self.inserted + self.updated
    }
}

/// Wait applied when the quota reset time is unknown or unreadable.
pub const RATE_LIMIT_FALLBACK_WAIT: Duration = Duration::from_secs(60);

/// A fetcher API rate limit
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FetcherRateLimit {
    /// The maximum number of requests that can be made in a given time period.
    pub limit: i32,
    /// The cost of the current request.
    pub cost: i32,
    /// The remaining number of requests that can be made in the current time period.
    pub remaining: i32,
    /// The time at which the rate limit will reset.
    pub reset_at: String,
}

impl FetcherRateLimit {
    /// Whether the remaining quota is at or below the given threshold.
    pub fn is_exhausted(&self, threshold: i32) -> bool {
        self.remaining <= threshold
    }

    /// Time left until the quota resets, zero if the reset time has passed.
    pub fn duration_until_reset(&self, now: DateTime<Utc>) -> StdResult<Duration> {
        let reset_at = DateTime::parse_from_rfc3339(&self.reset_at)
            .with_context(|| format!("Invalid rate limit reset time: {}", self.reset_at))?
            .with_timezone(&Utc);

        Ok((reset_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    #[cfg(test)]
    /// Creates a dummy `FetcherRateLimit` instance for testing purposes.
    pub fn dummy() -> Self {
        Self {
            limit: 5000,
            cost: 1,
            remaining: 4999,
            reset_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }
}

impl Display for FetcherRateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RateLimit: calls={}/{} (+{}), reset={}",
            self.limit - self.remaining,
            self.limit,
            self.cost,
            self.reset_at
        )
    }
}

/// Terminal status of a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlStatus {
    /// The crawl is still in progress.
    Running,
    /// The target number of repositories was reached.
    Success,
    /// Every partition was processed but the target was not reached, or partitions were skipped.
    Partial(String),
    /// The crawl was aborted.
    Failed(String),
}

impl Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlStatus::Running => write!(f, "running"),
            CrawlStatus::Success => write!(f, "success"),
            CrawlStatus::Partial(reason) => write!(f, "partial ({reason})"),
            CrawlStatus::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Progress and final outcome of a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// The total number of repositories to be fetched
    pub total_repositories_target: u32,

    /// The total number of repositories fetched and handed to the persister
    pub total_fetched_repositories: u32,

    /// The total number of rows inserted
    pub total_inserted_repositories: u32,

    /// The total number of rows updated (repositories already stored)
    pub total_updated_repositories: u32,

    /// The total number of fetcher calls made
    pub total_fetcher_calls: u32,

    /// Partitions fully processed
    pub partitions_completed: u32,

    /// Partitions abandoned after a fetch failure
    pub partitions_skipped: u32,

    /// The partition being processed
    pub current_partition: Option<DateRangePartition>,

    /// The last API rate limit reported by the fetcher
    pub api_rate_limit: FetcherRateLimit,

    /// The status of the crawl
    pub status: CrawlStatus,
}

impl CrawlReport {
    /// Creates an empty report for a crawl with the given target.
    pub fn new(total_repositories_target: u32) -> Self {
        Self {
            total_repositories_target,
            total_fetched_repositories: 0,
            total_inserted_repositories: 0,
            total_updated_repositories: 0,
            total_fetcher_calls: 0,
            partitions_completed: 0,
            partitions_skipped: 0,
            current_partition: None,
            api_rate_limit: FetcherRateLimit::default(),
            status: CrawlStatus::Running,
        }
    }

    /// Records the outcome of a persisted batch.
    pub fn record_batch(&mut self, fetched: u32, outcome: PersistOutcome) {
        self.total_fetched_repositories += fetched;
        self.total_inserted_repositories += outcome.inserted;
        self.total_updated_repositories += outcome.updated;
    }

    /// The total number of repositories successfully persisted.
    pub fn total_persisted_repositories(&self) -> u32 {
        self.total_inserted_repositories + self.total_updated_repositories
    }

    /// Number of repositories still needed to reach the target.
    pub fn remaining_repositories(&self) -> u32 {
        self.total_repositories_target
            .saturating_sub(self.total_fetched_repositories)
    }

    pub fn has_reached_target(&self) -> bool {
        self.remaining_repositories() == 0
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CrawlStatus::Failed(_))
    }
}

impl Display for CrawlReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current_partition = self
            .current_partition
            .as_ref()
            .map(|partition| partition.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "Repositories: done={}/{}, persisted={}, inserted={}, updated={}, Requests: done={}, Partitions: done={}, skipped={}, current={}, Status: {}, {}",
            self.total_fetched_repositories,
            self.total_repositories_target,
            self.total_persisted_repositories(),
            self.total_inserted_repositories,
            self.total_updated_repositories,
            self.total_fetcher_calls,
            self.partitions_completed,
            self.partitions_skipped,
            current_partition,
            self.status,
            self.api_rate_limit
        )
    }
}
