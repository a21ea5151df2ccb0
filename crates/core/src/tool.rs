//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the orchestrator the ability to act in the world:
//! search the web, place phone calls, send messages, start sub-agent
//! tasks, read and write the shared status log.
//!
//! Two properties matter beyond the usual name/schema/execute surface:
//!
//! - **Contextual parameters**: a tool may declare parameter names
//!   (`user_id`, `conversation_id`) whose values are always overwritten by
//!   the loop with the authoritative values from the running task. Values
//!   the model supplies for these parameters are never trusted.
//! - **Side effects**: a tool may declare that invoking it has irreversible
//!   external effects (calls placed, messages sent). The loop uses this to
//!   reset its wait bookkeeping, and such tools carry their own
//!   idempotency guards.

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known name of the tool that requests loop suspension. The loop
/// inspects dispatched calls for this name to enter its wait state.
pub const WAIT_TOOL_NAME: &str = "wait";

/// Well-known name of the completion-marking tool. A successful dispatch
/// of this tool is the explicit completion signal.
pub const COMPLETE_TOOL_NAME: &str = "mark_complete";

/// A requested tool invocation, as proposed by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The call ID this outcome is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (shown to the model)
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutcome {
    /// A successful outcome with plain text output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// A failed outcome carrying an error message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: message.into(),
            data: None,
        }
    }

    /// Attach structured data to this outcome.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The core Tool trait.
///
/// Each capability (web_search, outbound_call, whatsapp_task, write_status,
/// mark_complete, etc.) implements this trait. Tools are registered in the
/// ToolRegistry and made available to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Parameter names the loop must overwrite with authoritative task
    /// values before execution. Model-supplied values for these are
    /// discarded.
    fn contextual_params(&self) -> &[&str] {
        &[]
    }

    /// Whether invoking this tool has irreversible external side effects
    /// (calls placed, messages sent, bookings started).
    fn has_side_effects(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Look up contextual parameters to inject
/// 3. Dispatch tool calls when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Dispatch a tool call. Never panics and never returns Err: an unknown
    /// tool or a failing capability is converted into a failed ToolOutcome
    /// so one flaky dependency cannot abort a multi-step task.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutcome {
                call_id: call.id.clone(),
                success: false,
                output: format!("Error: unknown tool '{}'", call.name),
                data: None,
            };
        };

        match tool.execute(call.arguments.clone()).await {
            Ok(mut outcome) => {
                outcome.call_id = call.id.clone();
                outcome
            }
            Err(e) => ToolOutcome {
                call_id: call.id.clone(),
                success: false,
                output: format!("Error: {e}"),
                data: None,
            },
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
