//! Booking-completion webhook.
//!
//! The booking sub-agent calls back when a browser-automation run
//! finishes. The webhook's only job is to translate the callback into
//! one status update the waiting orchestrator can observe. Malformed or
//! missing fields degrade to "unknown" placeholders; a parseable webhook
//! is never rejected.

use crate::SharedState;
use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The callback payload from the booking service.
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub run_id: String,
    pub status: String,
    /// Either a JSON-encoded string or an object carrying conversation
    /// tracking and booking details
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
    pub status: &'static str,
}

/// Conversation tracking extracted from the webhook output.
#[derive(Debug, PartialEq)]
pub struct ParsedOutput {
    pub conversation_id: String,
    pub agent_id: String,
    pub agent_type: String,
    pub booking_details: serde_json::Value,
}

/// Extract tracking fields from the webhook's output, which may be an
/// object, a JSON-encoded string, plain text, or absent.
pub fn parse_output(output: Option<&serde_json::Value>) -> ParsedOutput {
    let fallback = |details: serde_json::Value| ParsedOutput {
        conversation_id: "unknown".into(),
        agent_id: "unknown".into(),
        agent_type: "unknown".into(),
        booking_details: details,
    };

    let Some(output) = output else {
        return fallback(serde_json::json!({}));
    };

    let object = match output {
        serde_json::Value::Object(_) => output.clone(),
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(parsed) if parsed.is_object() => parsed,
            _ => return fallback(serde_json::json!({ "raw_output": s })),
        },
        other => return fallback(serde_json::json!({ "raw_output": other })),
    };

    let field = |name: &str| {
        object[name]
            .as_str()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    };

    ParsedOutput {
        conversation_id: field("conversation_id"),
        agent_id: field("agent_id"),
        agent_type: field("agent_type"),
        booking_details: object
            .get("booking_details")
            .cloned()
            .unwrap_or(serde_json::json!({})),
    }
}

/// Compose the status line written for a finished booking run.
pub fn compose_status_message(
    status: &str,
    run_id: &str,
    booking_details: &serde_json::Value,
    failure_reason: Option<&str>,
) -> String {
    let mut message = if status.eq_ignore_ascii_case("completed") {
        let mut m = format!("Booking completed successfully (Run ID: {run_id})");
        if let Some(confirmation) = booking_details["booking_confirmation_number"].as_str() {
            m.push_str(&format!(" - Confirmation: {confirmation}"));
        }
        if let Some(price) = booking_details["total_price"].as_str() {
            m.push_str(&format!(" - Price: {price}"));
        }
        if let (Some(from), Some(to)) = (
            booking_details["departure_city"].as_str(),
            booking_details["destination_city"].as_str(),
        ) {
            m.push_str(&format!(" - Route: {from} to {to}"));
        }
        m
    } else {
        let mut m = format!("Booking failed (Run ID: {run_id})");
        if let Some(reason) = failure_reason {
            m.push_str(&format!(" - Reason: {reason}"));
        }
        m
    };

    if booking_details.as_object().is_some_and(|o| !o.is_empty()) {
        message.push_str(&format!(" - Details: {booking_details}"));
    }

    message
}

pub async fn task_complete_handler(
    State(state): State<SharedState>,
    Json(webhook): Json<WebhookRequest>,
) -> Json<WebhookResponse> {
    info!(
        run_id = %webhook.run_id,
        status = %webhook.status,
        "Received booking webhook"
    );

    let parsed = parse_output(webhook.output.as_ref());
    let update = compose_status_message(
        &webhook.status,
        &webhook.run_id,
        &parsed.booking_details,
        webhook.failure_reason.as_deref(),
    );

    // One status write per webhook; a failed write must not fail the
    // webhook, the booking service will not retry meaningfully.
    if let Err(e) = state
        .status
        .write(
            &parsed.agent_id,
            &parsed.agent_type,
            &parsed.conversation_id,
            &update,
        )
        .await
    {
        warn!(
            run_id = %webhook.run_id,
            error = %e,
            "Failed to write booking completion status"
        );
    }

    let message = if webhook.status.eq_ignore_ascii_case("completed") {
        format!("Task {} completed successfully and status recorded", webhook.run_id)
    } else {
        format!("Task {} failed and failure details recorded", webhook.run_id)
    };

    Json(WebhookResponse {
        message,
        status: "processed",
    })
}
