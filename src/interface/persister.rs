use crate::{PersistOutcome, RepositoryRecord, StdResult};

/// A trait for persisting repository data to a storage medium.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepositoryPersister: Sync + Send {
    /// Upserts the repositories, keyed on owner and repository name.
    async fn persist(&self, data: &[RepositoryRecord]) -> StdResult<PersistOutcome>;
}
