mod config;
mod entities;
mod error;
mod partition;
mod request;
mod response;

pub use config::*;
pub use entities::*;
pub use error::*;
pub use partition::*;
pub use request::*;
pub use response::*;
