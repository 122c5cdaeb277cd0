mod crawler_sequential;
mod fetcher_graphql;
mod fetcher_rate_limiter;
mod fetcher_retrier;
mod persister_memory;
mod persister_postgresql;
mod sleeper_tokio;

pub use crawler_sequential::*;
pub use fetcher_graphql::*;
pub use fetcher_rate_limiter::*;
pub use fetcher_retrier::*;
pub use persister_memory::*;
pub use persister_postgresql::*;
pub use sleeper_tokio::*;
