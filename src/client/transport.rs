use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use url::Url;

use crate::error::TransportError;

/// One outgoing HTTP request, independent of the client library that sends it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Header value as a string, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes one HTTP request and returns one HTTP response.
///
/// Implementations must not retry, follow redirects on their own behalf in a
/// way that changes the method, or interpret status codes; all of that is the
/// caller's business.
pub trait Transport: Send + Sync {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>>;
}

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: 32 * 1024 * 1024,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let mut response = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if body.len() + chunk.len() > self.max_body_bytes {
                    return Err(TransportError::Other(format!(
                        "response body exceeds {} bytes",
                        self.max_body_bytes
                    )));
                }
                body.extend_from_slice(&chunk);
            }

            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}
