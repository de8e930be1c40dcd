//! Outbound webhook transport.
//!
//! [`WebhookClient`] performs exactly one HTTP POST per invocation with a
//! bounded timeout; retry is the scheduler's job. The [`DeliveryTransport`]
//! trait exists so scheduler tests can script outcomes without a network.

use std::time::Duration;

use async_trait::async_trait;

/// Default HTTP request timeout for a single delivery attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body prefix kept for the ledger.
const MAX_BODY_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// AttemptResult
// ---------------------------------------------------------------------------

/// What happened on one outbound attempt.
///
/// `success` is true iff the HTTP status code was in `[200, 300)`. Any
/// other status, a transport error, or a timeout counts as a failure for
/// retry purposes. Both response fields are `None` on transport
/// failure/timeout.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub success: bool,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
}

// ---------------------------------------------------------------------------
// DeliveryTransport
// ---------------------------------------------------------------------------

/// Executes a single webhook POST. No internal retry.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> AttemptResult;
}

// ---------------------------------------------------------------------------
// WebhookClient
// ---------------------------------------------------------------------------

/// reqwest-backed transport used in production.
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    /// Create a client with the given per-attempt timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client }
    }
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl DeliveryTransport for WebhookClient {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> AttemptResult {
        let response = match self.client.post(url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url, error = %e, "Webhook request failed before a response");
                return AttemptResult {
                    success: false,
                    response_status: None,
                    response_body: None,
                };
            }
        };

        let status = response.status();
        // Body read shares the overall request timeout; an unreadable body
        // is not a delivery failure if the status was already a success.
        let body = match response.text().await {
            Ok(mut text) => {
                if text.len() > MAX_BODY_BYTES {
                    // Back up to a char boundary; truncate panics mid-codepoint.
                    let mut cut = MAX_BODY_BYTES;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                Some(text)
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "Failed to read webhook response body");
                None
            }
        };

        AttemptResult {
            success: status.is_success(),
            response_status: Some(status.as_u16()),
            response_body: body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_does_not_panic() {
        let _client = WebhookClient::default();
        let _short = WebhookClient::new(Duration::from_secs(1));
    }
}
