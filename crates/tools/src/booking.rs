//! Flight booking sub-agent gateway tool.
//!
//! Starts a browser-automation booking run and returns the run id
//! immediately. The booking service calls back over a webhook when the
//! run finishes, which the gateway translates into a status update.

use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use std::time::Duration;
use tracing::info;

pub struct BookFlightTool {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BookFlightTool {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for BookFlightTool {
    fn name(&self) -> &str {
        "book_flight"
    }

    fn description(&self) -> &str {
        "Book a flight through the booking agent. Requires traveler information. The booking \
         runs in a remote browser session; its completion arrives later as a status update."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "traveler_info": {
                    "type": "object",
                    "description": "Traveler details: first_name, last_name, email, phone, address, city, country, postal_code",
                    "properties": {
                        "first_name": { "type": "string" },
                        "last_name": { "type": "string" },
                        "email": { "type": "string" },
                        "phone": { "type": "string" }
                    }
                },
                "booking_link": {
                    "type": "string",
                    "description": "The direct booking link to drive"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["traveler_info", "booking_link"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["conversation_id"]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let traveler_info = arguments
            .get("traveler_info")
            .filter(|v| v.is_object())
            .ok_or_else(|| {
                ToolError::InvalidArguments("Missing 'traveler_info' object".into())
            })?;
        let booking_link = arguments["booking_link"].as_str().ok_or_else(|| {
            ToolError::InvalidArguments("Missing 'booking_link' argument".into())
        })?;
        let conversation_id = arguments["conversation_id"].as_str().unwrap_or_default();

        info!(conversation_id, "Starting booking sub-agent run");

        let payload = serde_json::json!({
            "direct_booking_link": booking_link,
            "traveler_info": traveler_info,
            "conversation_id": conversation_id,
        });

        let response = self
            .client
            .post(format!(
                "{}/flights/book-direct",
                self.base_url.trim_end_matches('/')
            ))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                let run_id = body["run_id"].as_str().unwrap_or("unknown").to_string();
                Ok(ToolOutcome::ok(format!(
                    "Booking run {run_id} started. The booking completes asynchronously; wait \
                     and then check status updates for the result."
                ))
                .with_data(serde_json::json!({ "run_id": run_id })))
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Ok(ToolOutcome::err(format!(
                    "Booking gateway error {status}: {text}"
                )))
            }
            Err(e) => Ok(ToolOutcome::err(format!("Booking failed: {e}"))),
        }
    }
}
