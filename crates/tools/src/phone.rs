//! Outbound phone call tool and phone number helpers.
//!
//! The call tool is a sub-agent gateway: it asks the phone-call service
//! to start a call and returns the call id immediately. Call completion
//! is observed later through the status log, never by blocking here.

use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// A phone number found in free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundPhoneNumber {
    /// The raw matched text
    pub raw: String,
    /// Digits only (plus a leading + if present)
    pub cleaned: String,
}

/// Scan free text for phone-number-like digit runs.
///
/// A candidate is a run of digits, spaces, dashes, dots and parentheses
/// (optionally led by `+`) that cleans down to at least 10 digits.
pub fn extract_phone_numbers(text: &str) -> Vec<FoundPhoneNumber> {
    let mut found = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let start_ok = chars[i] == '+' || chars[i].is_ascii_digit() || chars[i] == '(';
        if !start_ok {
            i += 1;
            continue;
        }

        let start = i;
        let mut end = i;
        while end < chars.len() {
            let c = chars[end];
            let part_of_number = c.is_ascii_digit()
                || c == ' '
                || c == '-'
                || c == '.'
                || c == '('
                || c == ')'
                || (c == '+' && end == start);
            if !part_of_number {
                break;
            }
            end += 1;
        }

        let raw: String = chars[start..end].iter().collect();
        let raw = raw.trim().to_string();
        let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();
        let digit_count = cleaned.chars().filter(|c| c.is_ascii_digit()).count();

        if digit_count >= 10 {
            found.push(FoundPhoneNumber { raw, cleaned });
        }

        i = end.max(start + 1);
    }

    found
}

/// Convert a raw phone number to international format.
///
/// Numbers with a leading 0 or no country prefix are assumed to be UK.
pub fn format_international(phone_number: &str) -> String {
    let cleaned: String = phone_number
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if let Some(rest) = cleaned.strip_prefix('0') {
        format!("+44{rest}")
    } else if !cleaned.starts_with('+') {
        format!("+44{cleaned}")
    } else {
        cleaned
    }
}

/// Starts an outbound phone call through the phone sub-agent gateway.
pub struct OutboundCallTool {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OutboundCallTool {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for OutboundCallTool {
    fn name(&self) -> &str {
        "outbound_call"
    }

    fn description(&self) -> &str {
        "Makes a complete outbound phone call to perform a task. Starts the call and returns \
         a call id immediately; the call's outcome arrives later as status updates. Requires a \
         phone number — search for one first if you don't have it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "A detailed description of the task to accomplish during the call"
                },
                "phone_number": {
                    "type": "string",
                    "description": "The phone number to call, in international format"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["task", "phone_number"]
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
        let task = arguments["task"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'task' argument".into()))?;
        let phone_number = arguments["phone_number"].as_str().ok_or_else(|| {
            ToolError::InvalidArguments("Missing 'phone_number' argument".into())
        })?;
        let conversation_id = arguments["conversation_id"].as_str().unwrap_or_default();

        let formatted = format_international(phone_number);
        info!(phone = %formatted, "Starting outbound call");

        let payload = serde_json::json!({
            "task": task,
            "phone_number": formatted,
            "conversation_id": conversation_id,
        });

        let response = self
            .client
            .post(format!("{}/calls", self.base_url.trim_end_matches('/')))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                let call_id = body["call_id"].as_str().unwrap_or("unknown").to_string();
                Ok(ToolOutcome::ok(format!(
                    "Outbound call initiated successfully. Call ID: {call_id}. \
                     The call runs independently; check status updates for its outcome."
                ))
                .with_data(serde_json::json!({
                    "call_id": call_id,
                    "phone_number": formatted,
                })))
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Ok(ToolOutcome::err(format!(
                    "Phone gateway error {status}: {text}"
                )))
            }
            Err(e) => Ok(ToolOutcome::err(format!("Phone call failed: {e}"))),
        }
    }
}
