//! Contact management tools — thin proxies over the contact service.

use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use std::time::Duration;

/// Fetches all contacts for the current user.
pub struct GetContactsTool {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GetContactsTool {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for GetContactsTool {
    fn name(&self) -> &str {
        "get_contacts"
    }

    fn description(&self) -> &str {
        "Get all contacts for the current user, including names, phone numbers and emails."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            }
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["user_id"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let user_id = arguments["user_id"].as_str().unwrap_or_default();
        if user_id.is_empty() {
            return Err(ToolError::InvalidArguments(
                "user_id must be injected before dispatch".into(),
            ));
        }

        let response = self
            .client
            .get(format!(
                "{}/api/contacts/{user_id}",
                self.base_url.trim_end_matches('/')
            ))
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                Ok(ToolOutcome::ok(body.to_string()).with_data(body))
            }
            Ok(resp) => Ok(ToolOutcome::err(format!(
                "Contact service error {}",
                resp.status().as_u16()
            ))),
            Err(e) => Ok(ToolOutcome::err(format!("Contact lookup failed: {e}"))),
        }
    }
}

/// Adds a new contact for the current user.
pub struct AddContactTool {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AddContactTool {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for AddContactTool {
    fn name(&self) -> &str {
        "add_contact"
    }

    fn description(&self) -> &str {
        "Add a new contact for the current user. Provide contact details such as FirstName, \
         LastName, email and phoneNumber."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "contact": {
                    "type": "object",
                    "description": "Contact fields (FirstName, LastName, email, phoneNumber)"
                },
                "user_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["contact"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["user_id"]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let contact = arguments
            .get("contact")
            .filter(|v| v.is_object())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'contact' object".into()))?;
        let user_id = arguments["user_id"].as_str().unwrap_or_default();

        let payload = serde_json::json!({
            "UserID": user_id,
            "contact": contact,
        });

        let response = self
            .client
            .post(format!(
                "{}/api/contacts/add",
                self.base_url.trim_end_matches('/')
            ))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                Ok(ToolOutcome::ok(body.to_string()).with_data(body))
            }
            Ok(resp) => Ok(ToolOutcome::err(format!(
                "Contact service error {}",
                resp.status().as_u16()
            ))),
            Err(e) => Ok(ToolOutcome::err(format!("Contact add failed: {e}"))),
        }
    }
}
