//! Direct outbound messaging with duplicate suppression.
//!
//! The model sometimes re-issues an identical send when it misreads its
//! own prior action as not yet taken. A per-recipient cache of recently
//! sent bodies rejects an identical resend inside the suppression window
//! instead of sending it again. Suppression is surfaced as a normal
//! failed outcome so the model can adjust.

use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-recipient cache of recently sent message bodies.
pub struct DuplicateCache {
    recent: Mutex<HashMap<String, Vec<(String, Instant)>>>,
    window: Duration,
}

impl DuplicateCache {
    pub fn new(window: Duration) -> Self {
        Self {
            recent: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Whether an identical body was sent to this recipient inside the
    /// suppression window. Expired entries are pruned on the way.
    pub async fn is_duplicate(&self, recipient: &str, body: &str) -> bool {
        let mut recent = self.recent.lock().await;
        let now = Instant::now();

        if let Some(entries) = recent.get_mut(recipient) {
            entries.retain(|(_, sent_at)| now.duration_since(*sent_at) < self.window);
            entries.iter().any(|(sent_body, _)| sent_body == body)
        } else {
            false
        }
    }

    /// Record a successfully sent body for this recipient.
    pub async fn record(&self, recipient: &str, body: &str) {
        let mut recent = self.recent.lock().await;
        recent
            .entry(recipient.to_string())
            .or_default()
            .push((body.to_string(), Instant::now()));
    }
}

/// The transport that actually delivers a message.
///
/// Split out as a trait so the suppression logic is testable without a
/// live messaging gateway.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Deliver the message. Returns a delivery status string.
    async fn send(&self, recipient: &str, message: &str) -> Result<String, String>;
}

/// Delivers messages through the WhatsApp gateway's send endpoint.
pub struct HttpMessageTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpMessageTransport {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl MessageTransport for HttpMessageTransport {
    async fn send(&self, recipient: &str, message: &str) -> Result<String, String> {
        let payload = serde_json::json!({
            "recipient": recipient,
            "message": message,
        });

        let response = self
            .client
            .post(format!("{}/send", self.base_url.trim_end_matches('/')))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok("Message sent".into())
        } else {
            Err(format!("gateway error {}", response.status().as_u16()))
        }
    }
}

/// Sends a direct message to a recipient, with duplicate suppression.
pub struct SendMessageTool {
    transport: Arc<dyn MessageTransport>,
    cache: Arc<DuplicateCache>,
}

impl SendMessageTool {
    pub fn new(transport: Arc<dyn MessageTransport>, cache: Arc<DuplicateCache>) -> Self {
        Self { transport, cache }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a direct message to a person. An identical message to the same recipient sent \
         twice in quick succession is rejected as a duplicate."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "recipient": {
                    "type": "string",
                    "description": "The recipient's phone number or chat id"
                },
                "message": {
                    "type": "string",
                    "description": "The message text to send"
                }
            },
            "required": ["recipient", "message"]
        })
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let recipient = arguments["recipient"]
            .as_str()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'recipient' argument".into()))?;
        let message = arguments["message"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message' argument".into()))?;

        if self.cache.is_duplicate(recipient, message).await {
            debug!(recipient, "Duplicate message suppressed");
            return Ok(ToolOutcome::err(
                "Duplicate message detected. Prevented sending.",
            ));
        }

        match self.transport.send(recipient, message).await {
            Ok(status) => {
                self.cache.record(recipient, message).await;
                info!(recipient, "Message sent");
                Ok(ToolOutcome::ok(status))
            }
            Err(e) => Ok(ToolOutcome::err(format!("Message delivery failed: {e}"))),
        }
    }
}
