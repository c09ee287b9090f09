//! Response handling shared by the Security Copilot and Log Analytics clients

use crate::core::{BridgeError, Result};
use serde_json::Value as JsonValue;
use tracing::error;

/// Decode a JSON response body, turning non-2xx statuses into transport errors.
///
/// An empty 2xx body decodes to `null`.
pub(crate) async fn read_json(response: reqwest::Response, operation: &str) -> Result<JsonValue> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        error!("Error {}: {} - {}", operation, status.as_u16(), body);
        return Err(BridgeError::transport(
            Some(status.as_u16()),
            format!("{} failed with HTTP {}: {}", operation, status, body),
        ));
    }

    if body.trim().is_empty() {
        return Ok(JsonValue::Null);
    }

    serde_json::from_str(&body).map_err(|e| {
        BridgeError::MalformedResponse(format!("{} returned invalid JSON: {}", operation, e))
    })
}
