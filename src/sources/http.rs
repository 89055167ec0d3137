// Shared HTTP plumbing for the provider adapters: per-request timeout,
// status classification into the ProviderError taxonomy, health recording.
use crate::sources::health::HealthTracker;
use crate::types::{ProviderError, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use url::Url;

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ProviderError::Network(e.to_string()))
}

/// Issue one GET and decode the body as JSON. Every failure mode is folded
/// into the taxonomy; nothing reqwest-shaped escapes the adapters.
pub async fn get_json(
    client: &Client,
    url: Url,
    header: Option<(&'static str, &str)>,
    timeout: Duration,
    source: &'static str,
    health: &HealthTracker,
) -> Result<serde_json::Value> {
    let started = Instant::now();

    let mut request = client.get(url);
    if let Some((name, value)) = header {
        request = request.header(name, value);
    }

    let response = match tokio::time::timeout(timeout, request.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            health.record_failure();
            return Err(ProviderError::Network(e.to_string()));
        }
        Err(_) => {
            health.record_failure();
            return Err(ProviderError::Network(format!(
                "{source} request timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        health.record_failure();
        return Err(ProviderError::Auth { provider: source });
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        health.record_failure();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(ProviderError::RateLimit {
            provider: source,
            retry_after,
        });
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        health.record_failure();
        return Err(ProviderError::NotFound(format!("{source}: 404")));
    }

    if !status.is_success() {
        health.record_failure();
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::Network(format!(
            "{source} API error ({status}): {text}"
        )));
    }

    match response.json::<serde_json::Value>().await {
        Ok(body) => {
            health.record_success(started.elapsed().as_millis() as u64);
            Ok(body)
        }
        Err(e) => {
            health.record_failure();
            Err(ProviderError::Schema(e.to_string()))
        }
    }
}
