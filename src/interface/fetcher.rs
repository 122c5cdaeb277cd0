use crate::{Response, SearchRequest, StdResult};

/// A trait for fetching pages of repository search results from the API.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepositoryFetcher: Sync + Send {
    /// Fetches one page of repositories for the request.
    async fn fetch(&self, request: &SearchRequest) -> StdResult<Response>;
}
