mod crawler;
mod fetcher;
mod persister;
mod sleeper;

pub use crawler::*;
pub use fetcher::*;
pub use persister::*;
pub use sleeper::*;
