pub mod breaker;
pub mod events;
pub mod lender;
pub mod volatility;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::{ApiKey, RetrySettings, Settings, Url};
use crate::domain::SourceTag;
use crate::error::FeedError;

pub use breaker::{BreakerState, CircuitBreaker};
pub use events::{EventFeed, EventOutlook, HttpEventFeed};
pub use lender::{HttpLenderFeed, LenderFeed, LenderQuote};
pub use volatility::{HttpVolatilityFeed, VolatilityFeed, VolatilityReading};

/// Shared plumbing for the three HTTP feeds: a tuned client, API-key auth,
/// jittered exponential retry, and the endpoint's circuit breaker.
///
/// One call through [`FeedTransport::get_json`] is one unit of work from the
/// breaker's point of view: however many retry attempts it takes, the final
/// outcome is what gets recorded.
pub(crate) struct FeedTransport {
    feed: &'static str,
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<ApiKey>,
    timeout: Duration,
    retry: RetrySettings,
    breaker: Arc<CircuitBreaker>,
}

impl FeedTransport {
    pub(crate) fn new(
        feed: &'static str,
        base_url: Url,
        api_key: Option<ApiKey>,
        settings: &Settings,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            // Per-request ceiling; callers may tighten per call via the
            // request deadline.
            .timeout(settings.feed_timeout)
            // Fail fast on dead hosts instead of burning the whole budget
            // on the TCP handshake.
            .connect_timeout(settings.feed_timeout.min(Duration::from_secs(2)))
            .pool_idle_timeout(Duration::from_secs(60))
            .user_agent(concat!("locate-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Transport {
                feed,
                msg: e.to_string(),
            })?;

        Ok(Self {
            feed,
            http,
            base_url,
            api_key,
            timeout: settings.feed_timeout,
            retry: settings.retry,
            breaker,
        })
    }

    pub(crate) fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry.min_delay)
            .with_max_delay(self.retry.max_delay)
            .with_max_times(self.retry.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }

    /// Performs a GET against `path`, retrying per policy, and reports the
    /// outcome to the endpoint's breaker.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<(T, SourceTag), FeedError> {
        if !self.breaker.admit() {
            return Err(FeedError::CircuitOpen { feed: self.feed });
        }

        let retries = AtomicU32::new(0);
        let outcome = (|| self.fetch_once::<T>(path, query))
            .retry(self.backoff())
            .when(|e: &FeedError| e.is_retryable())
            .notify(|err: &FeedError, delay: Duration| {
                retries.fetch_add(1, Ordering::Relaxed);
                warn!(feed = self.feed, error = %err, ?delay, "retrying feed call");
            })
            .await;

        match outcome {
            Ok(value) => {
                self.breaker.record_success();
                let tag = if retries.load(Ordering::Relaxed) > 0 {
                    SourceTag::Retry
                } else {
                    SourceTag::Live
                };
                Ok((value, tag))
            }
            Err(e) => {
                if e.counts_against_breaker() {
                    self.breaker.record_failure();
                } else {
                    // 4xx means the endpoint is up and answering.
                    self.breaker.record_success();
                }
                Err(e)
            }
        }
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FeedError> {
        let url = format!("{}{}", self.base_url.0.trim_end_matches('/'), path);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key.0.as_str());
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                feed: self.feed,
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| FeedError::Decode {
            feed: self.feed,
            msg: e.to_string(),
        })
    }

    fn classify(&self, e: reqwest::Error) -> FeedError {
        if e.is_timeout() {
            FeedError::TimedOut {
                feed: self.feed,
                timeout: self.timeout,
            }
        } else {
            FeedError::Transport {
                feed: self.feed,
                // reqwest error strings do not include the URL unless asked;
                // keep it that way so logs stay free of upstream addresses.
                msg: e.without_url().to_string(),
            }
        }
    }
}
