use futures::future::BoxFuture;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::client::transport::{ApiRequest, Transport};
use crate::error::{AuthError, TransportError};

pub const TOKEN_URL_BASE: &str = "https://api.kindly.ai/api/v2/bot";

const MAX_TOKEN_BODY_BYTES: usize = 1 << 20;

/// A freshly issued token and how long the issuer says it stays valid.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Issues bearer tokens. Each call is one network round trip.
pub trait TokenSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<TokenGrant, AuthError>>;
}

#[derive(Deserialize)]
struct TokenBody {
    jwt: String,
    ttl: u64,
}

/// Exchanges a static API key for a short-lived JWT at the token endpoint.
pub struct ApiKeyTokenSource {
    api_key: String,
    token_url: Url,
    transport: Arc<dyn Transport>,
}

impl ApiKeyTokenSource {
    pub fn new(
        api_key: impl Into<String>,
        token_url: Url,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            token_url,
            transport,
        }
    }

    /// `{base}/{bot_id}/sage/auth`
    pub fn token_url(base: &str, bot_id: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/{}/sage/auth", base.trim_end_matches('/'), bot_id))
    }

    fn request(&self) -> Result<ApiRequest, AuthError> {
        let mut req = ApiRequest::get(self.token_url.clone());
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            AuthError::Transport(TransportError::Other(
                "api key is not a valid header value".to_string(),
            ))
        })?;
        req.headers.insert(AUTHORIZATION, bearer);
        req.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(req)
    }
}

impl TokenSource for ApiKeyTokenSource {
    fn fetch(&self) -> BoxFuture<'_, Result<TokenGrant, AuthError>> {
        Box::pin(async move {
            let response = self.transport.execute(self.request()?).await?;

            match response.status {
                StatusCode::OK => {}
                StatusCode::UNAUTHORIZED => return Err(AuthError::Unauthorized),
                status => {
                    return Err(AuthError::TransientFetch {
                        status: status.as_u16(),
                    })
                }
            }

            let content_type = response.header(CONTENT_TYPE.as_str()).unwrap_or("");
            if !content_type.starts_with("application/json") {
                return Err(AuthError::Malformed(format!(
                    "unexpected content-type: {content_type}"
                )));
            }
            if response.body.len() > MAX_TOKEN_BODY_BYTES {
                return Err(AuthError::Malformed(format!(
                    "token response exceeds {MAX_TOKEN_BODY_BYTES} bytes"
                )));
            }

            let body: TokenBody = serde_json::from_slice(&response.body)
                .map_err(|e| AuthError::Malformed(format!("decoding token response: {e}")))?;

            Ok(TokenGrant {
                token: body.jwt,
                ttl: Duration::from_secs(body.ttl),
            })
        })
    }
}
