//! Initial plan generation.
//!
//! Before the first iteration, the loop may ask the model for a
//! step-by-step plan. Planning is best-effort: a failed or unparseable
//! plan yields an empty one and the run proceeds without it.

use maestro_core::Provider;
use maestro_core::provider::ProviderRequest;
use maestro_core::transcript::Turn;
use std::sync::Arc;
use tracing::warn;

const PLANNER_SYSTEM: &str = "You are an expert task planner. Analyze the given task and \
create a step-by-step plan using the available tools (web search, phone calls, WhatsApp \
tasks, bookings, contacts, memory, status updates).\n\nReturn a JSON list of steps, where \
each step describes what needs to be done.\n\nExample format:\n[\"Search for restaurant \
contact information\", \"Call restaurant to place order\", \"Confirm order details\"]\n\n\
IMPORTANT: Return ONLY the JSON list, no other text.";

/// Ask the model for an initial plan. Failures yield an empty plan.
pub async fn generate_plan(
    provider: &Arc<dyn Provider>,
    model: &str,
    temperature: f32,
    task: &str,
) -> Vec<String> {
    let request = ProviderRequest {
        model: model.to_string(),
        turns: vec![
            Turn::system(PLANNER_SYSTEM),
            Turn::user(format!("Create a step-by-step plan for this task: {task}")),
        ],
        temperature,
        max_tokens: Some(1024),
        tools: Vec::new(),
    };

    match provider.complete(request).await {
        Ok(response) => match parse_plan(&response.turn.content) {
            Some(plan) => plan,
            None => {
                warn!("Planner returned no parseable step list");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(error = %e, "Planning failed");
            Vec::new()
        }
    }
}

/// Extract a JSON string list from model output, tolerating surrounding prose.
pub(crate) fn parse_plan(text: &str) -> Option<Vec<String>> {
    let trimmed = text.trim();

    if let Ok(plan) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Some(plan);
    }

    // Locate an embedded [...] fragment
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&trimmed[start..=end]).ok()
}
