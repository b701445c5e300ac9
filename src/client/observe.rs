use std::time::Duration;

/// Metadata of one transport attempt made by the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub method: String,
    pub url: String,
    /// `None` when the transport failed before a response arrived.
    pub status: Option<u16>,
    pub latency: Duration,
    /// 1-based attempt number within a single logical request.
    pub attempt: u32,
}

/// Receives one record per attempt.
pub trait AttemptSink: Send + Sync {
    fn record(&self, attempt: &Attempt);
}

/// Default sink: one structured `tracing` event per attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AttemptSink for TracingSink {
    fn record(&self, attempt: &Attempt) {
        match attempt.status {
            Some(status) if status >= 400 => tracing::warn!(
                method = %attempt.method,
                url = %attempt.url,
                status,
                latency_ms = attempt.latency.as_millis() as u64,
                attempt = attempt.attempt,
                "statistics request"
            ),
            Some(status) => tracing::info!(
                method = %attempt.method,
                url = %attempt.url,
                status,
                latency_ms = attempt.latency.as_millis() as u64,
                attempt = attempt.attempt,
                "statistics request"
            ),
            None => tracing::warn!(
                method = %attempt.method,
                url = %attempt.url,
                latency_ms = attempt.latency.as_millis() as u64,
                attempt = attempt.attempt,
                "statistics request failed without response"
            ),
        }
    }
}
