//! Call-control facade over the telephony provider's HTTP API.
//!
//! Every provider call runs under a 5 s timeout with 2 retries on
//! transient failures (connect errors, 429, 5xx). Non-retryable failures
//! surface as upstream errors to the caller.

use serde_json::Value;

use vb_domain::error::{Error, Result};

/// Wall clock for one provider RPC attempt.
const RPC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Retries after the first attempt on transient failures.
const RPC_RETRIES: usize = 2;

pub struct TelephonyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TelephonyClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| Error::upstream("telephony", e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Place an outbound call; the provider streams its media to
    /// `media_stream_url` once the callee answers. Returns the provider's
    /// call id.
    pub async fn place_call(&self, target_e164: &str, media_stream_url: &str) -> Result<String> {
        let body = serde_json::json!({
            "to": target_e164,
            "mediaStreamUrl": media_stream_url,
        });
        let response = self.post_with_retries("/calls", &body).await?;
        response
            .get("callId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::upstream("telephony", "place-call response missing callId"))
    }

    /// Tear down a provider call.
    pub async fn hangup(&self, call_id: &str) -> Result<()> {
        let body = serde_json::json!({});
        self.post_with_retries(&format!("/calls/{call_id}/hangup"), &body)
            .await?;
        Ok(())
    }

    async fn post_with_retries(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut last_err = None;

        for attempt in 0..=RPC_RETRIES {
            if attempt > 0 {
                tracing::debug!(url = %url, attempt, "retrying telephony RPC");
            }

            let mut request = self.http.post(&url).json(body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        // Empty bodies are fine for control endpoints.
                        let text = resp
                            .text()
                            .await
                            .map_err(|e| Error::upstream("telephony", e.to_string()))?;
                        if text.trim().is_empty() {
                            return Ok(Value::Null);
                        }
                        return serde_json::from_str(&text).map_err(Error::from);
                    }

                    let message = format!("HTTP {}", status.as_u16());
                    if is_transient_status(status.as_u16()) {
                        last_err = Some(Error::upstream("telephony", message));
                        continue;
                    }
                    return Err(Error::upstream("telephony", message));
                }
                // Connect failures and per-attempt timeouts are transient.
                Err(e) => {
                    last_err = Some(Error::upstream("telephony", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::upstream("telephony", "RPC retries exhausted")))
    }
}

/// Whether an HTTP status warrants a retry.
fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}
