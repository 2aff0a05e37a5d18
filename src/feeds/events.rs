use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{CircuitBreaker, FeedTransport};
use crate::config::Settings;
use crate::domain::{SourceTag, Ticker};
use crate::error::{ConfigError, EngineResult, FeedError};

/// Upcoming-event risk for one ticker.
///
/// `risk_factor` is the worst single event on the calendar, 0-10. A zero
/// with `event_count == 0` is an authoritative "nothing scheduled", which
/// the resolver records differently from an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOutlook {
    pub risk_factor: u8,
    pub event_count: usize,
    pub source: SourceTag,
}

/// The corporate-event calendar source.
#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn event_outlook(&self, ticker: &Ticker) -> Result<EventOutlook, FeedError>;
}

#[derive(Debug, Deserialize)]
struct EventWire {
    #[allow(dead_code)]
    #[serde(default)]
    event_type: Option<String>,
    risk_factor: u8,
    #[allow(dead_code)]
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EventCalendarWire {
    #[serde(default)]
    events: Vec<EventWire>,
}

pub struct HttpEventFeed {
    transport: FeedTransport,
}

impl HttpEventFeed {
    pub fn new(settings: &Settings, breaker: Arc<CircuitBreaker>) -> EngineResult<Self> {
        let base_url = settings
            .events
            .base_url
            .clone()
            .ok_or(ConfigError::Missing("LOCATE_EVENT_API_URL"))?;
        let transport = FeedTransport::new(
            "events",
            base_url,
            settings.events.api_key.clone(),
            settings,
            breaker,
        )?;
        Ok(Self { transport })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.transport.breaker()
    }
}

#[async_trait]
impl EventFeed for HttpEventFeed {
    async fn event_outlook(&self, ticker: &Ticker) -> Result<EventOutlook, FeedError> {
        let ticker_param = ticker.to_string();
        let outcome = self
            .transport
            .get_json::<EventCalendarWire>("/api/events", &[("ticker", ticker_param.as_str())])
            .await;

        let (wire, source) = match outcome {
            Ok(hit) => hit,
            // A ticker the calendar has never heard of has no events.
            Err(FeedError::Status { status: 404, .. }) => {
                return Ok(EventOutlook {
                    risk_factor: 0,
                    event_count: 0,
                    source: SourceTag::Live,
                });
            }
            Err(e) => return Err(e),
        };

        let risk_factor = wire
            .events
            .iter()
            .map(|event| event.risk_factor.min(10))
            .max()
            .unwrap_or(0);

        Ok(EventOutlook {
            risk_factor,
            event_count: wire.events.len(),
            source,
        })
    }
}
