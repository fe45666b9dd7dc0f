//! HTTP helpers shared by knowledge-source readers and model providers.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::{RagKbError, Result};

/// User-Agent string for outgoing requests.
pub const USER_AGENT: &str = concat!("ragkb/", env!("CARGO_PKG_VERSION"));

/// Build the process-wide HTTP client. No request is sent.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| RagKbError::Network(format!("failed to build HTTP client: {e}")))
}

/// Send a request and decode a JSON body, mapping non-success statuses to
/// [`RagKbError::from_status`].
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = send(request).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| RagKbError::parse(format!("invalid response body: {e}")))
}

/// Send a request and return the response if its status is a success.
pub async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| RagKbError::Network(e.without_url().to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after_secs(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(RagKbError::from_status(status.as_u16(), &body, retry_after))
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}
