//! Production wiring shared by the CLI and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ApiKeyTokenSource, CredentialCache};
use crate::client::transport::{ReqwestTransport, Transport};
use crate::client::{ClientConfig, StatsClient};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::export::Exporter;

/// One reqwest transport shared by the token source and the statistics client.
pub fn build_exporter(config: &AppConfig) -> Result<Exporter> {
    let api = &config.api;
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(Duration::from_secs(
        api.http_timeout_secs,
    ))?);

    let token_url = ApiKeyTokenSource::token_url(&api.token_url_base, &api.bot_id)
        .map_err(|e| Error::Validation(format!("invalid token url: {e}")))?;
    let token_source = ApiKeyTokenSource::new(api.api_key.clone(), token_url, transport.clone());
    let credentials = Arc::new(CredentialCache::new(Arc::new(token_source)));

    let client = StatsClient::new(
        api.bot_id.clone(),
        credentials,
        ClientConfig::new(transport)
            .with_base_url(api.base_url.clone())
            .with_backoff(config.retry.backoff()),
    )?;

    Ok(Exporter::new(Arc::new(client))
        .with_concurrency(config.export.concurrency)
        .with_default_sources(config.export.default_sources.clone()))
}
