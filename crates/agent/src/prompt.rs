//! System preamble construction.
//!
//! The preamble describes the available tools and the operating rules the
//! model works under. It is the first turn of every transcript.

use maestro_core::provider::ToolDefinition;

/// Build the fixed system preamble from the registered tool definitions.
pub fn system_preamble(tools: &[ToolDefinition]) -> String {
    let mut tool_lines: Vec<String> = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect();
    tool_lines.sort();

    format!(
        "You are an intelligent task completion agent. You complete tasks by calling the \
available tools.

AVAILABLE TOOLS:
{}

GUIDELINES:
1. The user provides an initial context object. Use it to inform your plan and actions.
2. Analyze the request and break it down into steps.
3. IMPORTANT: Do NOT include user_id or conversation_id in your tool calls. They are \
handled automatically.
4. For phone calls, find a valid phone number first using web_search or get_contacts.
5. Provide clear progress updates with write_status.
6. Sub-agents (phone calls, WhatsApp tasks, bookings) run independently and report through \
status updates and memory. After starting one, use the wait tool, then check read_status \
and search_memory for their progress.
7. Never send the same message twice; a duplicate will be rejected.
8. Be methodical, and explain your reasoning before each tool call.
9. Once you have verified the task is complete, you MUST call mark_complete to finish.",
        tool_lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "web_search".into(),
                description: "Search the web".into(),
                parameters: serde_json::json!({}),
            },
            ToolDefinition {
                name: "outbound_call".into(),
                description: "Place a phone call".into(),
                parameters: serde_json::json!({}),
            },
        ]
    }

    #[test]
    fn preamble_lists_all_tools() {
        let preamble = system_preamble(&defs());
        assert!(preamble.contains("- web_search: Search the web"));
        assert!(preamble.contains("- outbound_call: Place a phone call"));
    }

    #[test]
    fn preamble_states_operating_rules() {
        let preamble = system_preamble(&defs());
        assert!(preamble.contains("Do NOT include user_id or conversation_id"));
        assert!(preamble.contains("mark_complete"));
    }

    #[test]
    fn preamble_is_deterministic() {
        // Tool ordering must not depend on registry iteration order
        let mut reversed = defs();
        reversed.reverse();
        assert_eq!(system_preamble(&defs()), system_preamble(&reversed));
    }
}
