use std::fmt::Display;

use super::DateRangePartition;

/// The maximum number of results the search API returns for a single query.
pub const MAX_RESULTS_PER_QUERY: u32 = 1000;

/// The maximum number of results the search API returns in a single page.
pub const MAX_PAGE_SIZE: u16 = 100;

/// A search request for one page of a date range partition.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct SearchRequest {
    /// The base search filter, without the date range qualifier.
    pub(crate) base_query: String,

    /// The creation date range the request is scoped to.
    pub(crate) partition: DateRangePartition,

    /// The number of repositories to return.
    pub(crate) first: u16,

    /// The cursor for pagination.
    pub(crate) after: Option<String>,
}

impl SearchRequest {
    /// Creates a new `SearchRequest` with the given filter, partition, first, and after values.
    pub fn new(
        base_query: &str,
        partition: DateRangePartition,
        first: u16,
        after: Option<String>,
    ) -> Self {
        Self {
            base_query: base_query.to_string(),
            partition,
            first,
            after,
        }
    }

    /// The full search query string sent to the API.
    pub fn search_query(&self) -> String {
        let created_qualifier = self.partition.created_qualifier();
        match self.base_query.trim() {
            "" => created_qualifier,
            base_query => format!("{base_query} {created_qualifier}"),
        }
    }

    /// Retrieves the partition this request belongs to.
    pub fn partition(&self) -> &DateRangePartition {
        &self.partition
    }

    /// Creates a dummy `SearchRequest` for testing purposes.
    #[cfg(test)]
    pub(crate) fn dummy() -> Self {
        Self::new("is:public", DateRangePartition::dummy(), 10, None)
    }
}

impl Display for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SearchRequest: query={}, first={}, after={:?}",
            self.search_query(),
            self.first,
            self.after
        )
    }
}

/// Pagination state while walking the pages of one partition.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchCursor {
    /// The cursor returned by the last page.
    after: Option<String>,

    /// The number of results fetched in the partition so far.
    fetched: u32,

    /// Whether the partition has no more reachable results.
    exhausted: bool,
}

impl FetchCursor {
    /// Builds the request for the next page, never asking beyond the per query ceiling.
    ///
    /// Returns `None` once the partition is exhausted.
    pub fn next_request(
        &self,
        base_query: &str,
        partition: &DateRangePartition,
        page_size: u16,
    ) -> Option<SearchRequest> {
        if self.is_exhausted() {
            return None;
        }
        let first = (page_size as u32).min(self.remaining_in_partition()) as u16;

        Some(SearchRequest::new(
            base_query,
            partition.to_owned(),
            first,
            self.after.to_owned(),
        ))
    }

    /// Moves the cursor past a fetched page.
    pub fn advance(&mut self, fetched: u32, has_next_page: bool, end_cursor: Option<String>) {
        self.fetched += fetched;
        self.after = end_cursor;
        self.exhausted = fetched == 0 || !has_next_page || self.after.is_none();
    }

    /// Results that can still be fetched before hitting the per query ceiling.
    pub fn remaining_in_partition(&self) -> u32 {
        MAX_RESULTS_PER_QUERY.saturating_sub(self.fetched)
    }

    pub fn fetched(&self) -> u32 {
        self.fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.remaining_in_partition() == 0
    }
}
