use super::{FetcherRateLimit, RepositoryRecord};

/// One page of search results with its pagination and rate limit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Retrieved repositories and their metadata
    pub(crate) repositories: Vec<RepositoryRecord>,

    /// Whether the API reports a following page
    pub(crate) has_next_page: bool,

    /// The cursor to resume from on the following page
    pub(crate) end_cursor: Option<String>,

    /// The API rate limit information
    pub(crate) rate_limit: FetcherRateLimit,
}

impl Response {
    /// Creates a new `Response` instance with the given repositories and page metadata.
    pub fn new(
        repositories: Vec<RepositoryRecord>,
        has_next_page: bool,
        end_cursor: Option<String>,
        rate_limit: FetcherRateLimit,
    ) -> Self {
        Self {
            repositories,
            has_next_page,
            end_cursor,
            rate_limit,
        }
    }

    /// Retrieves the list of repositories.
    pub fn repositories(&self) -> &[RepositoryRecord] {
        &self.repositories
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn end_cursor(&self) -> Option<&str> {
        self.end_cursor.as_deref()
    }

    /// Retrieves the API rate limit information.
    pub fn rate_limit(&self) -> &FetcherRateLimit {
        &self.rate_limit
    }
}
