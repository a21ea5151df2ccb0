//! Web search tool backed by the search proxy of the global tools API.
//!
//! Results are post-processed to surface phone numbers found in titles
//! and snippets, since finding a number to call is the most common reason
//! the orchestrator searches.

use crate::phone::extract_phone_numbers;
use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::tool::{Tool, ToolOutcome};
use std::time::Duration;
use tracing::debug;

pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information relevant to the current task. Returns results with \
         titles, URLs and snippets, plus any phone numbers found in the result text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default 10)",
                    "default": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let max_results = arguments["max_results"].as_u64().unwrap_or(10).min(20);

        debug!(query, "Searching the web");

        let response = self
            .client
            .get(format!("{}/api/search", self.base_url.trim_end_matches('/')))
            .timeout(self.timeout)
            .query(&[("query", query)])
            .send()
            .await;

        let body: serde_json::Value = match response {
            Ok(resp) if resp.status().is_success() => resp.json().await.unwrap_or_default(),
            Ok(resp) => {
                let status = resp.status().as_u16();
                return Ok(ToolOutcome::err(format!("Search proxy error {status}")));
            }
            Err(e) => return Ok(ToolOutcome::err(format!("Search failed: {e}"))),
        };

        let empty = Vec::new();
        let results = body["results"].as_array().unwrap_or(&empty);
        let mut processed = Vec::new();
        let mut phone_numbers_found = Vec::new();

        for result in results.iter().take(max_results as usize) {
            let title = result["title"].as_str().unwrap_or("");
            let content = result["content"].as_str().unwrap_or("");
            let url = result["url"].as_str().unwrap_or("");

            for phone in extract_phone_numbers(&format!("{content} {title}")) {
                phone_numbers_found.push(serde_json::json!({
                    "number": phone.raw,
                    "cleaned": phone.cleaned,
                    "source": title,
                    "url": url,
                }));
            }

            processed.push(serde_json::json!({
                "title": title,
                "content": content,
                "url": url,
            }));
        }

        let data = serde_json::json!({
            "success": true,
            "query": query,
            "answer": body["answer"].as_str().unwrap_or(""),
            "results": processed,
            "result_count": processed.len(),
            "phone_numbers_found": phone_numbers_found,
        });

        Ok(ToolOutcome::ok(serde_json::to_string_pretty(&data).unwrap_or_default())
            .with_data(data))
    }
}
