use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::warn;
use tokio::sync::Mutex;

use crate::{
    FetcherError, FetcherRateLimit, RATE_LIMIT_FALLBACK_WAIT, RepositoryFetcher, Response,
    SearchRequest, Sleeper, StdResult,
};

/// Shortest wait after the API refused a request for quota reasons.
const MIN_RATE_LIMITED_WAIT: Duration = Duration::from_secs(1);

/// This struct is responsible for enforcing rate limits on fetcher requests.
///
/// When the last response reported a remaining quota at or below the threshold,
/// the enforcer waits until the quota reset time before issuing the next request.
/// Requests refused by the API because the quota is used up are re-issued after
/// the reset, without surfacing a failure.
pub struct FetcherRateLimitEnforcer {
    /// The fetcher to be rate limited.
    fetcher: Arc<dyn RepositoryFetcher>,

    /// Remaining quota at or below which the enforcer waits.
    threshold: i32,

    /// Used to wait for the quota reset.
    sleeper: Arc<dyn Sleeper>,

    /// The rate limit reported by the last response.
    last_rate_limit: Mutex<Option<FetcherRateLimit>>,
}

impl FetcherRateLimitEnforcer {
    /// Creates a new `FetcherRateLimitEnforcer` instance with the given fetcher.
    pub fn new(
        fetcher: Arc<dyn RepositoryFetcher>,
        threshold: i32,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            fetcher,
            threshold,
            sleeper,
            last_rate_limit: Mutex::new(None),
        }
    }

    async fn wait_if_exhausted(&self) {
        let Some(rate_limit) = self.last_rate_limit.lock().await.take() else {
            return;
        };
        if !rate_limit.is_exhausted(self.threshold) {
            return;
        }
        let duration_until_reset = match rate_limit.duration_until_reset(Utc::now()) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("{e:#}, falling back to {RATE_LIMIT_FALLBACK_WAIT:?}");
                RATE_LIMIT_FALLBACK_WAIT
            }
        };
        warn!(
            "Fetcher rate limit exhausted (remaining={}), waiting for {duration_until_reset:?}",
            rate_limit.remaining
        );
        self.sleeper.sleep(duration_until_reset).await;
    }
}

#[async_trait::async_trait]
impl RepositoryFetcher for FetcherRateLimitEnforcer {
    /// Enforce the rate limit on the fetcher requests.
    async fn fetch(&self, request: &SearchRequest) -> StdResult<Response> {
        self.wait_if_exhausted().await;
        loop {
            match self.fetcher.fetch(request).await {
                Ok(response) => {
                    *self.last_rate_limit.lock().await = Some(response.rate_limit().to_owned());
                    return Ok(response);
                }
                Err(e) => match e.downcast_ref::<FetcherError>() {
                    Some(FetcherError::RateLimited { reset_at }) => {
                        let duration_until_reset = (*reset_at - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO)
                            .max(MIN_RATE_LIMITED_WAIT);
                        warn!("Rate limited, resuming {request} in {duration_until_reset:?}");
                        self.sleeper.sleep(duration_until_reset).await;
                    }
                    _ => return Err(e),
                },
            }
        }
    }
}
