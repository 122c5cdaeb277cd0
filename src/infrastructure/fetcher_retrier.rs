use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use log::warn;
use rand::Rng;

use crate::{
    CrawlerError, RepositoryFetcher, Response, RetryPolicy, SearchRequest, Sleeper, StdResult,
};

/// A struct that retries a RepositoryFetcher a specified number of times in case of failure with exponential backoff strategy.
pub struct FetcherRetrier {
    /// The fetcher to be retried.
    fetcher: Arc<dyn RepositoryFetcher>,

    /// The attempt ceiling and backoff settings.
    policy: RetryPolicy,

    /// Used to wait between attempts.
    sleeper: Arc<dyn Sleeper>,
}

impl FetcherRetrier {
    /// Creates a new `FetcherRetrier` instance with the given retry policy.
    pub fn new(
        fetcher: Arc<dyn RepositoryFetcher>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            fetcher,
            policy,
            sleeper,
        }
    }

    fn calculate_backoff_delay(&self, failures: u32) -> Duration {
        let delay = self.policy.backoff_delay(failures);
        if self.policy.jitter {
            let jitter_ms = u64::try_from(self.policy.base_delay.as_millis()).unwrap_or(u64::MAX);
            delay.saturating_add(Duration::from_millis(
                rand::thread_rng().gen_range(0..=jitter_ms),
            ))
        } else {
            delay
        }
    }
}

#[async_trait::async_trait]
impl RepositoryFetcher for FetcherRetrier {
    /// Retries the request if it fails, up to the maximum number of attempts.
    async fn fetch(&self, request: &SearchRequest) -> StdResult<Response> {
        let mut attempts = 0;

        loop {
            match self.fetcher.fetch(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    attempts += 1;
                    warn!(
                        "Fetch attempt #{attempts}/{} failed for {request}: {e}",
                        self.policy.max_attempts
                    );
                    if attempts >= self.policy.max_attempts {
                        return Err(anyhow!(CrawlerError::PartitionFetchFailed {
                            partition: request.partition().to_owned(),
                            attempts,
                            message: e.to_string(),
                        }));
                    }
                    self.sleeper
                        .sleep(self.calculate_backoff_delay(attempts))
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mockall::{Sequence, predicate::eq};

    use crate::{FetcherRateLimit, MockRepositoryFetcher, MockSleeper, RepositoryRecord};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            jitter: false,
        }
    }

    fn successful_response() -> StdResult<Response> {
        Ok(Response::new(
            vec![RepositoryRecord::dummy("org-1", "repository-1", 10)],
            false,
            None,
            FetcherRateLimit::dummy(),
        ))
    }

    #[tokio::test]
    async fn fetch_success_on_first_attempt() {
        let fetcher = {
            let mut fetcher = MockRepositoryFetcher::new();
            fetcher
                .expect_fetch()
                .returning(|_| successful_response())
                .times(1);

            fetcher
        };
        let sleeper = {
            let mut sleeper = MockSleeper::new();
            sleeper.expect_sleep().never();

            sleeper
        };
        let retrier = FetcherRetrier::new(Arc::new(fetcher), policy(3), Arc::new(sleeper));

        retrier.fetch(&SearchRequest::dummy()).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_success_after_retries() {
        let mut seq = Sequence::new();
        let mut fetcher = MockRepositoryFetcher::new();
        let mut sleeper = MockSleeper::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(anyhow!("Error fetching data")))
            .times(1)
            .in_sequence(&mut seq);
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_millis(10)))
            .returning(|_| ())
            .times(1)
            .in_sequence(&mut seq);
        fetcher
            .expect_fetch()
            .returning(|_| Err(anyhow!("Error fetching data")))
            .times(1)
            .in_sequence(&mut seq);
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_millis(20)))
            .returning(|_| ())
            .times(1)
            .in_sequence(&mut seq);
        fetcher
            .expect_fetch()
            .returning(|_| successful_response())
            .times(1)
            .in_sequence(&mut seq);
        let retrier = FetcherRetrier::new(Arc::new(fetcher), policy(3), Arc::new(sleeper));

        let response = retrier.fetch(&SearchRequest::dummy()).await.unwrap();

        assert_eq!(1, response.repositories().len());
    }

    #[tokio::test]
    async fn fetch_failure_after_max_attempts() {
        let fetcher = {
            let mut fetcher = MockRepositoryFetcher::new();
            fetcher
                .expect_fetch()
                .returning(|_| Err(anyhow!("Error fetching data")))
                .times(3);

            fetcher
        };
        let delays = Arc::new(Mutex::new(vec![]));
        let sleeper = {
            let delays = delays.clone();
            let mut sleeper = MockSleeper::new();
            sleeper
                .expect_sleep()
                .returning(move |duration| delays.lock().unwrap().push(duration));

            sleeper
        };
        let retrier = FetcherRetrier::new(Arc::new(fetcher), policy(3), Arc::new(sleeper));

        let error = retrier
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Expected failure after max attempts");

        assert_eq!(
            vec![Duration::from_millis(10), Duration::from_millis(20)],
            *delays.lock().unwrap()
        );
        match error.downcast_ref::<CrawlerError>() {
            Some(CrawlerError::PartitionFetchFailed {
                partition,
                attempts,
                ..
            }) => {
                assert_eq!(SearchRequest::dummy().partition(), partition);
                assert_eq!(3, *attempts);
            }
            other => panic!("Expected a partition fetch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_with_jitter_stays_within_one_base_delay() {
        let fetcher = {
            let mut fetcher = MockRepositoryFetcher::new();
            fetcher
                .expect_fetch()
                .returning(|_| Err(anyhow!("Error fetching data")))
                .times(2);

            fetcher
        };
        let delays = Arc::new(Mutex::new(vec![]));
        let sleeper = {
            let delays = delays.clone();
            let mut sleeper = MockSleeper::new();
            sleeper
                .expect_sleep()
                .returning(move |duration| delays.lock().unwrap().push(duration));

            sleeper
        };
        let retrier = FetcherRetrier::new(
            Arc::new(fetcher),
            RetryPolicy {
                jitter: true,
                ..policy(2)
            },
            Arc::new(sleeper),
        );

        retrier
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Expected failure after max attempts");

        let delays = delays.lock().unwrap();
        assert_eq!(1, delays.len());
        assert!(delays[0] >= Duration::from_millis(10));
        assert!(delays[0] <= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn fetch_with_huge_base_delay_saturates() {
        let fetcher = {
            let mut fetcher = MockRepositoryFetcher::new();
            fetcher
                .expect_fetch()
                .returning(|_| Err(anyhow!("Error fetching data")))
                .times(2);

            fetcher
        };
        let sleeper = {
            let mut sleeper = MockSleeper::new();
            sleeper
                .expect_sleep()
                .with(eq(Duration::MAX))
                .returning(|_| ())
                .times(1);

            sleeper
        };
        let retrier = FetcherRetrier::new(
            Arc::new(fetcher),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::MAX,
                jitter: true,
            },
            Arc::new(sleeper),
        );

        retrier
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Expected failure after max attempts");
    }
}
