//! In-crate fakes shared by unit tests.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use reqwest::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::credential::{Clock, CredentialCache};
use crate::auth::token::{TokenGrant, TokenSource};
use crate::client::observe::{Attempt, AttemptSink};
use crate::client::retry::Backoff;
use crate::client::transport::{ApiRequest, ApiResponse, Transport};
use crate::client::{ClientConfig, StatsClient};
use crate::error::{AuthError, TransportError};

type Responder = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;
type DelayFn = Box<dyn Fn(&ApiRequest) -> Duration + Send + Sync>;

/// Transport that replays a fixed script of responses, or answers through a
/// responder closure, and records every request it receives.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    responder: Option<Responder>,
    delay: Option<DelayFn>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<ApiResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&ApiRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = &self.delay {
                tokio::time::sleep(delay(&request)).await;
            }
            if let Some(responder) = &self.responder {
                return responder(&request);
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".to_string())))
        })
    }
}

pub fn json_response(status: StatusCode, body: &str) -> ApiResponse {
    let mut resp = ApiResponse::new(status, body.as_bytes().to_vec());
    resp.headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

pub fn rate_limited(retry_after: Option<&'static str>) -> ApiResponse {
    let mut resp = ApiResponse::new(StatusCode::TOO_MANY_REQUESTS, Vec::new());
    if let Some(value) = retry_after {
        resp.headers
            .insert(RETRY_AFTER, HeaderValue::from_static(value));
    }
    resp
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2021, 2, 1, 12, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

type FailFn = Box<dyn Fn() -> AuthError + Send + Sync>;

/// Token source that counts fetches and issues `token-<n>`.
pub struct CountingTokenSource {
    calls: AtomicUsize,
    ttl: Duration,
    delay: Duration,
    fail: Option<FailFn>,
}

impl CountingTokenSource {
    pub fn ok(ttl_secs: u64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            ttl: Duration::from_secs(ttl_secs),
            delay: Duration::ZERO,
            fail: None,
        }
    }

    pub fn failing<F>(fail: F) -> Self
    where
        F: Fn() -> AuthError + Send + Sync + 'static,
    {
        Self {
            fail: Some(Box::new(fail)),
            ..Self::ok(0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenSource for CountingTokenSource {
    fn fetch(&self) -> BoxFuture<'_, Result<TokenGrant, AuthError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(fail) = &self.fail {
                return Err(fail());
            }
            Ok(TokenGrant {
                token: format!("token-{n}"),
                ttl: self.ttl,
            })
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<Attempt>>,
}

impl RecordingSink {
    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }
}

impl AttemptSink for RecordingSink {
    fn record(&self, attempt: &Attempt) {
        self.attempts.lock().unwrap().push(attempt.clone());
    }
}

/// Client over `transport` with a static token and millisecond backoff.
pub fn stats_client(transport: Arc<ScriptedTransport>) -> StatsClient {
    let credentials = Arc::new(CredentialCache::new(Arc::new(CountingTokenSource::ok(300))));
    let config = ClientConfig::new(transport).with_backoff(Backoff::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
    ));
    StatsClient::new("bot-1", credentials, config).unwrap()
}
