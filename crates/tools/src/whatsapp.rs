//! WhatsApp sub-agent gateway tool.
//!
//! Starts a conversation task on the remote WhatsApp agent and returns
//! immediately. The remote agent writes its own status updates and
//! memories; replies are observed through the status log after a wait.

use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use std::time::Duration;
use tracing::info;

pub struct WhatsappTaskTool {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl WhatsappTaskTool {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for WhatsappTaskTool {
    fn name(&self) -> &str {
        "whatsapp_task"
    }

    fn description(&self) -> &str {
        "Execute a task by contacting someone over WhatsApp through the WhatsApp agent. \
         Include the phone number of the person to contact in the task description. The agent \
         runs independently and reports progress through status updates and memory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Detailed task description, including the recipient's phone number"
                },
                "user_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["task"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["user_id", "conversation_id"]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let task = arguments["task"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'task' argument".into()))?;
        let user_id = arguments["user_id"].as_str().unwrap_or_default();
        let conversation_id = arguments["conversation_id"].as_str().unwrap_or_default();

        if user_id.is_empty() || conversation_id.is_empty() {
            return Err(ToolError::InvalidArguments(
                "user_id and conversation_id must be injected before dispatch".into(),
            ));
        }

        info!(conversation_id, "Starting WhatsApp sub-agent task");

        let payload = serde_json::json!({
            "task": task,
            "user_id": user_id,
            "conversation_id": conversation_id,
            "max_iterations": 10,
        });

        let response = self
            .client
            .post(format!(
                "{}/execute_task",
                self.base_url.trim_end_matches('/')
            ))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                Ok(ToolOutcome::ok(format!(
                    "WhatsApp task started. The agent runs independently; wait and then check \
                     status updates and memory for replies. Response: {body}"
                ))
                .with_data(body))
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Ok(ToolOutcome::err(format!(
                    "WhatsApp gateway error {status}: {text}"
                )))
            }
            Err(e) => Ok(ToolOutcome::err(format!("WhatsApp task failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> WhatsappTaskTool {
        WhatsappTaskTool::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".into(),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn declares_both_contextual_params() {
        assert_eq!(tool().contextual_params(), &["user_id", "conversation_id"]);
        assert!(tool().has_side_effects());
    }

    #[tokio::test]
    async fn rejects_missing_injected_context() {
        // The loop always injects these; a direct call without them is a
        // programmer error surfaced as invalid arguments.
        let result = tool()
            .execute(serde_json::json!({"task": "message +447874943523 about dinner"}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_failed_outcome() {
        let outcome = tool()
            .execute(serde_json::json!({
                "task": "message +447874943523 about dinner",
                "user_id": "user_1",
                "conversation_id": "conv_1"
            }))
            .await
            .unwrap();
        assert!(!outcome.success);
    }
}
