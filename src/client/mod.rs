pub mod observe;
pub mod retry;
pub mod transport;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::CredentialCache;
use crate::error::{AuthError, Error, Result};
use crate::filter::{self, Filter};
use crate::types::{
    ChatLabel, CountByDate, CountByDateWithRate, Feedback, Handovers, HandoversTimeSeries,
    PageStatistic, RateTotal,
};

use observe::{Attempt, AttemptSink, TracingSink};
use retry::{parse_retry_after, Backoff};
use transport::{ApiRequest, ApiResponse, Transport};

pub const BASE_URL: &str = "https://sage.kindly.ai/api/v1/stats/bot";

/// Endpoint paths below `{base}/{bot_id}/`.
pub mod endpoint {
    pub const FEEDBACK_SUMMARY: &str = "feedback/summary";
    pub const HANDOVERS_TOTAL: &str = "takeovers/totals";
    pub const HANDOVERS_SERIES: &str = "takeovers/series";
    pub const PAGE_STATISTICS: &str = "chatbubble/pages";
    pub const FALLBACKS_TOTAL: &str = "fallbacks/total";
    pub const FALLBACKS_SERIES: &str = "fallbacks/series";
    pub const USER_MESSAGES: &str = "sessions/messages";
    pub const CHAT_SESSIONS: &str = "sessions/chats";
    pub const CHAT_LABELS: &str = "labels/chats";
}

/// Everything a [`StatsClient`] is built from. Fixed once the client exists.
#[derive(Clone)]
pub struct ClientConfig {
    pub transport: Arc<dyn Transport>,
    pub sink: Arc<dyn AttemptSink>,
    /// Replaces [`BASE_URL`] when set.
    pub base_url: Option<String>,
    /// Used for 429 responses that carry no `Retry-After`.
    pub backoff: Backoff,
}

impl ClientConfig {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sink: Arc::new(TracingSink),
            base_url: None,
            backoff: Backoff::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Response wrapper. A missing `data` key decodes to `None`; an explicit
/// `null` decodes to `Some(Value::Null)`.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "present")]
    data: Option<serde_json::Value>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Read-only client for the statistics API.
pub struct StatsClient {
    bot_id: String,
    base_url: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialCache>,
    sink: Arc<dyn AttemptSink>,
    backoff: Backoff,
}

impl StatsClient {
    pub fn new(
        bot_id: impl Into<String>,
        credentials: Arc<CredentialCache>,
        config: ClientConfig,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .unwrap_or_else(|| BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Url::parse(&base_url)
            .map_err(|e| Error::Validation(format!("invalid base url {base_url:?}: {e}")))?;

        Ok(Self {
            bot_id: bot_id.into(),
            base_url,
            transport: config.transport,
            credentials,
            sink: config.sink,
            backoff: config.backoff,
        })
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// `{base}/{bot_id}/{endpoint}?{query}`
    pub fn endpoint_url(&self, endpoint: &str, filter: Option<&Filter>) -> Result<Url> {
        let raw = format!("{}/{}/{}", self.base_url, self.bot_id, endpoint);
        let mut url =
            Url::parse(&raw).map_err(|e| Error::Validation(format!("invalid url {raw:?}: {e}")))?;

        let pairs = filter::query(filter);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    /// Issue one logical GET and return the first response that is neither
    /// rate limited nor an error. 429s are retried with no attempt ceiling.
    async fn send(
        &self,
        cancel: &CancellationToken,
        endpoint: &str,
        filter: Option<&Filter>,
    ) -> Result<ApiResponse> {
        let url = self.endpoint_url(endpoint, filter)?;

        let credential = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            credential = self.credentials.valid_token() => credential?,
        };

        let mut request = ApiRequest::get(url);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&credential.authorization()).map_err(|_| {
            AuthError::Malformed("token is not a valid header value".to_string())
        })?;
        request.headers.insert(AUTHORIZATION, bearer);

        let mut attempt = 0u32;
        let mut backoff_retries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.transport.execute(request.clone()) => result,
            };
            self.sink.record(&Attempt {
                method: request.method.to_string(),
                url: request.url.to_string(),
                status: result.as_ref().ok().map(|r| r.status.as_u16()),
                latency: started.elapsed(),
                attempt,
            });
            let response = result?;

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                let delay = match response.headers.get(RETRY_AFTER) {
                    None => {
                        let delay = self.backoff.delay(backoff_retries);
                        backoff_retries = backoff_retries.saturating_add(1);
                        delay
                    }
                    Some(value) => match value.to_str().ok().and_then(parse_retry_after) {
                        Some(delay) => delay,
                        None => {
                            return Err(Error::Upstream {
                                status: response.status.as_u16(),
                                body: response.body_text(),
                            })
                        }
                    },
                };

                tracing::debug!(
                    endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, waiting before retry"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            if response.status.as_u16() > 399 {
                return Err(Error::Upstream {
                    status: response.status.as_u16(),
                    body: response.body_text(),
                });
            }

            return Ok(response);
        }
    }

    /// Fetch `endpoint` and decode the envelope's `data` into `T`.
    ///
    /// `Ok(None)` means the response carried no data: `data` was `null`, or
    /// the body did not start with a decodable envelope. Only the first JSON
    /// value of the body is read. A missing `data` key, or a payload that does
    /// not match `T`, is an error.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        endpoint: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>> {
        let response = self.send(cancel, endpoint, filter).await?;

        let envelope = match serde_json::Deserializer::from_slice(&response.body)
            .into_iter::<Envelope>()
            .next()
        {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                tracing::warn!(endpoint, error = %e, "undecodable response envelope, treating as no data");
                return Ok(None);
            }
            None => {
                tracing::warn!(endpoint, "empty response body, treating as no data");
                return Ok(None);
            }
        };

        match envelope.data {
            None => Err(Error::Decode(serde::de::Error::missing_field("data"))),
            Some(serde_json::Value::Null) => Ok(None),
            Some(data) => Ok(Some(serde_json::from_value(data)?)),
        }
    }

    /// Like [`fetch`](Self::fetch) with the body discarded.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        endpoint: &str,
        filter: Option<&Filter>,
    ) -> Result<()> {
        self.send(cancel, endpoint, filter).await.map(|_| ())
    }

    async fn fetch_or_default<T: DeserializeOwned + Default>(
        &self,
        cancel: &CancellationToken,
        endpoint: &str,
        filter: Option<&Filter>,
    ) -> Result<T> {
        Ok(self.fetch(cancel, endpoint, filter).await?.unwrap_or_default())
    }

    pub async fn aggregated_feedback(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Feedback> {
        self.fetch_or_default(cancel, endpoint::FEEDBACK_SUMMARY, filter)
            .await
    }

    pub async fn handovers_total(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Handovers> {
        self.fetch_or_default(cancel, endpoint::HANDOVERS_TOTAL, filter)
            .await
    }

    pub async fn handovers_time_series(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Vec<HandoversTimeSeries>> {
        self.fetch_or_default(cancel, endpoint::HANDOVERS_SERIES, filter)
            .await
    }

    pub async fn page_statistics(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Vec<PageStatistic>> {
        self.fetch_or_default(cancel, endpoint::PAGE_STATISTICS, filter)
            .await
    }

    pub async fn fallback_rate_total(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<RateTotal> {
        self.fetch_or_default(cancel, endpoint::FALLBACKS_TOTAL, filter)
            .await
    }

    pub async fn fallback_rate_time_series(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Vec<CountByDateWithRate>> {
        self.fetch_or_default(cancel, endpoint::FALLBACKS_SERIES, filter)
            .await
    }

    pub async fn user_messages(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Vec<CountByDate>> {
        self.fetch_or_default(cancel, endpoint::USER_MESSAGES, filter)
            .await
    }

    pub async fn chat_sessions(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Vec<CountByDate>> {
        self.fetch_or_default(cancel, endpoint::CHAT_SESSIONS, filter)
            .await
    }

    pub async fn chat_labels(
        &self,
        cancel: &CancellationToken,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChatLabel>> {
        self.fetch_or_default(cancel, endpoint::CHAT_LABELS, filter)
            .await
    }
}
