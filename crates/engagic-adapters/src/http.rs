// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared HTTP base every vendor adapter builds on (§4.1 "Shared base").

use engagic_error::{EngagicError, ErrorCode};
use engagic_retry::RetryConfig;

/// Identifies this crawler and gives operators a contact point, per §4.1
/// ("polite User-Agent identifying the crawler and contact URL").
pub const USER_AGENT: &str = "engagic/2.0 (Civic Engagement Bot; +https://engagic.example/bot)";

/// Build the shared `reqwest::Client` every adapter fetches through.
pub fn build_client() -> Result<reqwest::Client, EngagicError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| EngagicError::new(ErrorCode::AdapterTransportFailed, "failed to build HTTP client").with_source(e))
}

/// GET `url` and return the response body as text, retrying transport
/// failures and 429/5xx responses per [`RetryConfig::adapter_fetch`] (§4.1:
/// "3 attempts, exponential backoff (1s, 2s, 4s), retry on 429/5xx").
pub async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, EngagicError> {
    let config = RetryConfig::adapter_fetch();
    let outcome = engagic_retry::retry_async(
        &config,
        || async {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| EngagicError::new(ErrorCode::AdapterTransportFailed, "request failed").with_source(e))?;
            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(EngagicError::new(ErrorCode::AdapterTransportFailed, "retryable HTTP status")
                    .with_context("status", status.as_u16())
                    .with_context("url", url.to_string()));
            }
            if !status.is_success() {
                return Err(EngagicError::new(ErrorCode::AdapterTransportFailed, "non-retryable HTTP status")
                    .with_context("status", status.as_u16())
                    .with_context("url", url.to_string()));
            }
            response
                .text()
                .await
                .map_err(|e| EngagicError::new(ErrorCode::AdapterTransportFailed, "failed to read response body").with_source(e))
        },
        is_retryable,
    )
    .await;

    outcome.map(|o| o.value).map_err(|e| match e {
        engagic_retry::RetryError::Operation(err) => err,
        engagic_retry::RetryError::TimedOut { duration } => {
            EngagicError::new(ErrorCode::AdapterTransportFailed, "adapter fetch retry loop timed out")
                .with_context("timeout_secs", duration.as_secs())
                .with_context("url", url.to_string())
        }
    })
}

/// GET `url` and deserialize the response body as JSON, same retry policy
/// as [`get_text`].
pub async fn get_json<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, EngagicError> {
    let body = get_text(client, url).await?;
    serde_json::from_str(&body)
        .map_err(|e| EngagicError::new(ErrorCode::AdapterShapeMismatch, "response body is not the expected JSON shape").with_source(e))
}

fn is_retryable(error: &EngagicError) -> bool {
    error.code == ErrorCode::AdapterTransportFailed
        && error
            .context
            .get("status")
            .and_then(|v| v.as_u64())
            .map(|status| status == 429 || (500..600).contains(&status))
            .unwrap_or(true)
}
