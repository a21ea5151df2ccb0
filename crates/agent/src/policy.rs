//! Completion and routing policy — the loop's decision layer.
//!
//! Two concerns live here:
//!
//! 1. **Turn interpretation**: classifying a model response into a closed
//!    decision type (tool calls, completion, failure, or plain
//!    intermediate reasoning).
//! 2. **Completion assessment**: judging whether the task is done.
//!    Model-first with defensive parsing (strict JSON, then an embedded
//!    JSON fragment), falling back to a deterministic keyword policy when
//!    the model is unavailable or unparseable — the model is an
//!    unreliable dependency and the loop must still make forward progress
//!    or fail safely.

use maestro_core::Provider;
use maestro_core::provider::ProviderRequest;
use maestro_core::tool::ToolCall;
use maestro_core::transcript::Turn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the loop should do with a model response.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Dispatch these tool calls, in order.
    ToolCalls(Vec<ToolCall>),
    /// The model declared the task complete in free text.
    Complete { message: String },
    /// The model declared the task failed.
    Failed { reason: String },
    /// Plain text with no signal — intermediate reasoning, keep going.
    Continue,
}

const COMPLETION_PHRASES: &[&str] = &[
    "task completed",
    "successfully completed",
    "task is complete",
    "finished",
    "done",
    "accomplished",
];

const FAILURE_PHRASES: &[&str] = &["task failed", "unable to complete", "cannot complete"];

/// Classify a model turn into a decision.
///
/// Tool calls always win; free text is scanned for completion/failure
/// phrases; anything else is intermediate reasoning.
pub fn interpret_turn(turn: &Turn) -> Decision {
    if !turn.tool_calls.is_empty() {
        let calls = turn
            .tool_calls
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: serde_json::from_str(&tc.arguments)
                    .unwrap_or_else(|_| serde_json::json!({})),
            })
            .collect();
        return Decision::ToolCalls(calls);
    }

    let lower = turn.content.to_lowercase();
    if FAILURE_PHRASES.iter().any(|p| lower.contains(p)) {
        return Decision::Failed {
            reason: turn.content.clone(),
        };
    }
    if COMPLETION_PHRASES.iter().any(|p| lower.contains(p)) {
        return Decision::Complete {
            message: turn.content.clone(),
        };
    }

    Decision::Continue
}

/// A summary of run progress fed to the completion assessment.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub task: String,
    pub phone_calls_made: usize,
    pub successful_calls: usize,
    pub research_results: usize,
    pub key_facts_count: usize,
    pub latest_call_success: bool,
    pub has_research_data: bool,
}

/// The structured completion judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionAssessment {
    pub is_complete: bool,

    #[serde(default)]
    pub completion_score: f32,

    #[serde(default)]
    pub status_message: String,

    #[serde(default)]
    pub missing_requirements: Vec<String>,

    #[serde(default)]
    pub completion_indicators: Vec<String>,
}

const ASSESSOR_SYSTEM: &str = "You are an intelligent task completion analyzer. Analyze \
whether a given task has been completed based on the available information.\n\nTask \
analysis criteria:\n- Phone calls: check if required calls were made successfully\n- \
Research: verify if necessary information was gathered\n- Key facts: ensure important \
information was documented\n\nIMPORTANT: You MUST respond with ONLY valid JSON in this \
exact format. Do not include any other text:\n{\n    \"is_complete\": true,\n    \
\"completion_score\": 0.85,\n    \"status_message\": \"Brief status description\",\n    \
\"missing_requirements\": [\"list\", \"of\", \"missing\", \"items\"],\n    \
\"completion_indicators\": [\"list\", \"of\", \"completed\", \"items\"]\n}";

/// Which capability category the fallback router selects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteHint {
    PhoneCall,
    Research,
    Planner,
}

/// The two-tier completion policy: model-backed judgment with a
/// deterministic keyword fallback.
pub struct CompletionPolicy {
    provider: Option<Arc<dyn Provider>>,
    model: String,
}

impl CompletionPolicy {
    /// Model-backed policy; falls back to the deterministic policy when
    /// the model call fails or returns unparseable output.
    pub fn model_backed(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            model: model.into(),
        }
    }

    /// Deterministic-only policy (no model dependency).
    pub fn deterministic() -> Self {
        Self {
            provider: None,
            model: String::new(),
        }
    }

    /// Assess whether the task is complete.
    pub async fn assess(&self, snapshot: &StateSnapshot) -> CompletionAssessment {
        if let Some(provider) = &self.provider {
            let request = ProviderRequest {
                model: self.model.clone(),
                turns: vec![
                    Turn::system(ASSESSOR_SYSTEM),
                    Turn::user(format!(
                        "Task: {}\n\nCurrent State:\n- Phone calls made: {}\n- Successful \
calls: {}\n- Research results: {}\n- Key facts documented: {}\n- Latest call successful: \
{}\n- Has research data: {}\n\nAnalyze if this task is complete and provide your \
assessment.",
                        snapshot.task,
                        snapshot.phone_calls_made,
                        snapshot.successful_calls,
                        snapshot.research_results,
                        snapshot.key_facts_count,
                        snapshot.latest_call_success,
                        snapshot.has_research_data,
                    )),
                ],
                temperature: 0.1,
                max_tokens: Some(512),
                tools: Vec::new(),
            };

            match provider.complete(request).await {
                Ok(response) => {
                    if let Some(assessment) = parse_assessment(&response.turn.content) {
                        debug!(
                            is_complete = assessment.is_complete,
                            "Model completion assessment"
                        );
                        return assessment;
                    }
                    warn!("Completion assessment unparseable, using fallback policy");
                }
                Err(e) => {
                    warn!(error = %e, "Completion assessment failed, using fallback policy");
                }
            }
        }

        fallback_assessment(snapshot)
    }
}

/// Parse a completion assessment defensively: strict JSON first, then an
/// embedded `{...}` fragment inside surrounding prose.
pub fn parse_assessment(text: &str) -> Option<CompletionAssessment> {
    let trimmed = text.trim();

    if let Ok(assessment) = serde_json::from_str::<CompletionAssessment>(trimmed) {
        return Some(assessment);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<CompletionAssessment>(&trimmed[start..=end]).ok()
}

/// The deterministic fallback: keyword families imply requirements, and
/// completion means every implied requirement has a successful result and
/// at least one requirement was satisfied. A task with no detected
/// requirements and no indicators is never auto-completed here — it
/// defers to the explicit completion tool or iteration exhaustion.
pub fn fallback_assessment(snapshot: &StateSnapshot) -> CompletionAssessment {
    let task_lower = snapshot.task.to_lowercase();
    let mut completion_indicators = Vec::new();
    let mut missing_requirements = Vec::new();

    let needs_call = ["call", "phone", "contact"]
        .iter()
        .any(|k| task_lower.contains(k));
    let needs_research = ["research", "find", "search", "information"]
        .iter()
        .any(|k| task_lower.contains(k));

    if needs_call {
        if snapshot.successful_calls > 0 {
            completion_indicators.push("Phone call executed successfully".to_string());
        } else {
            missing_requirements.push("Successful phone call execution".to_string());
        }
    }

    if needs_research {
        if snapshot.has_research_data {
            completion_indicators.push("Research information gathered".to_string());
        } else {
            missing_requirements.push("Research data needs to be collected".to_string());
        }
    }

    if snapshot.key_facts_count > 0 {
        completion_indicators.push("Key facts documented".to_string());
    }

    let is_complete = missing_requirements.is_empty() && !completion_indicators.is_empty();
    let completion_score = completion_indicators.len() as f32
        / 1f32.max((completion_indicators.len() + missing_requirements.len()) as f32);

    let status_message = if is_complete {
        format!("Task completed. Achieved: {}", completion_indicators.join(", "))
    } else {
        format!("Task in progress. Missing: {}", missing_requirements.join(", "))
    };

    CompletionAssessment {
        is_complete,
        completion_score,
        status_message,
        missing_requirements,
        completion_indicators,
    }
}

/// Deterministic routing used when the model cannot be consulted: pick
/// the capability category implied by the outstanding requirements.
pub fn fallback_routing(missing_requirements: &[String]) -> RouteHint {
    if missing_requirements
        .iter()
        .any(|r| r.to_lowercase().contains("phone call"))
    {
        RouteHint::PhoneCall
    } else if missing_requirements
        .iter()
        .any(|r| {
            let lower = r.to_lowercase();
            lower.contains("research") || lower.contains("information")
        })
    {
        RouteHint::Research
    } else {
        RouteHint::Planner
    }
}
