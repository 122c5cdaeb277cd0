use thiserror::Error;

use super::DateRangePartition;

/// The standard result type used throughout the application.
pub type StdResult<T> = Result<T, anyhow::Error>;

/// Errors surfaced to the run-level orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlerError {
    /// Invalid or missing configuration, detected before any network activity.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// All attempts to fetch a page of a partition failed.
    #[error("Failed to fetch partition {partition} after {attempts} attempts: {message}")]
    PartitionFetchFailed {
        partition: DateRangePartition,
        attempts: u32,
        message: String,
    },

    /// The store rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(String),
}
