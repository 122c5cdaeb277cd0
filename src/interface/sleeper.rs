use std::time::Duration;

/// A trait for suspending the flow of control, so that waits can be observed in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Sleeper: Sync + Send {
    /// Waits for the given duration.
    async fn sleep(&self, duration: Duration);
}
