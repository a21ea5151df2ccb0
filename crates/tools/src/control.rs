//! Loop-control tools: wait and mark_complete.
//!
//! The wait tool does not sleep. It returns a directive the loop honors
//! by suspending itself, so a wait never blocks tool dispatch and the
//! loop keeps full control of its own suspension.

use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use maestro_store::StatusStore;
use std::sync::Arc;
use tracing::warn;

use crate::{ORCHESTRATOR_AGENT_ID, ORCHESTRATOR_AGENT_TYPE};

const DEFAULT_WAIT_SECS: u64 = 30;
const MAX_WAIT_SECS: u64 = 600;

/// Requests a bounded suspension of the loop.
#[derive(Default)]
pub struct WaitTool;

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        maestro_core::tool::WAIT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Wait for a specified duration before continuing. Use this after starting a phone \
         call, WhatsApp task or booking, to give the sub-agent time to make progress before \
         you check status updates."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "duration_seconds": {
                    "type": "integer",
                    "description": "How long to wait, in seconds (default 30, max 600)",
                    "default": 30
                }
            }
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let requested = arguments["duration_seconds"]
            .as_u64()
            .unwrap_or(DEFAULT_WAIT_SECS);
        let duration_secs = requested.clamp(1, MAX_WAIT_SECS);

        Ok(ToolOutcome::ok(format!(
            "Waiting {duration_secs} seconds before the next step."
        ))
        .with_data(serde_json::json!({
            "wait_requested": true,
            "duration_secs": duration_secs,
        })))
    }
}

/// Marks the task as complete and ends the run.
pub struct MarkCompleteTool {
    status: Arc<dyn StatusStore>,
}

impl MarkCompleteTool {
    pub fn new(status: Arc<dyn StatusStore>) -> Self {
        Self { status }
    }
}

#[async_trait]
impl Tool for MarkCompleteTool {
    fn name(&self) -> &str {
        maestro_core::tool::COMPLETE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Marks the current task as complete after verifying all steps are done. You MUST call \
         this as the final step once the original request has been fully satisfied; the run \
         ends after this tool succeeds."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "justification": {
                    "type": "string",
                    "description": "A clear, concise explanation of why the task is complete"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["justification"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["conversation_id"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let justification = arguments["justification"].as_str().ok_or_else(|| {
            ToolError::InvalidArguments("Missing 'justification' argument".into())
        })?;
        let conversation_id = arguments["conversation_id"].as_str().unwrap_or_default();
        if conversation_id.is_empty() {
            return Err(ToolError::InvalidArguments(
                "conversation_id must be injected before dispatch".into(),
            ));
        }

        // The status write is an observability side-channel: its failure is
        // logged but does not block completion.
        if let Err(e) = self
            .status
            .write(
                ORCHESTRATOR_AGENT_ID,
                ORCHESTRATOR_AGENT_TYPE,
                conversation_id,
                &format!("TASK_COMPLETED; Justification: {justification}"),
            )
            .await
        {
            warn!(conversation_id, error = %e, "Failed to write final status update");
        }

        Ok(ToolOutcome::ok("TASK_COMPLETED"))
    }
}
