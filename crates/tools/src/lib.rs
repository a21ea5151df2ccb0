//! Built-in tool implementations for Maestro.
//!
//! Tools give the orchestrator the ability to act in the world: search
//! the web, place phone calls, start WhatsApp and booking sub-agents,
//! send messages, manage contacts, and read/write the shared status log
//! and memory store.
//!
//! All external clients are dependency-injected through [`ToolDeps`],
//! constructed once at the process's composition root. Nothing in this
//! crate holds global mutable state.

pub mod booking;
pub mod contacts;
pub mod control;
pub mod messaging;
pub mod phone;
pub mod store_tools;
pub mod web_search;
pub mod whatsapp;

use maestro_core::tool::ToolRegistry;
use maestro_store::{MemoryStore, StatusStore};
use std::sync::Arc;
use std::time::Duration;

pub use messaging::{DuplicateCache, MessageTransport};

/// Endpoints of the sub-agent gateways and the global tools API.
#[derive(Debug, Clone)]
pub struct SubAgentEndpoints {
    pub phone_url: String,
    pub whatsapp_url: String,
    pub booking_url: String,
    pub timeout: Duration,
}

/// Everything the built-in tools need, constructed once per process.
pub struct ToolDeps {
    pub http: reqwest::Client,
    pub status: Arc<dyn StatusStore>,
    pub memory: Arc<dyn MemoryStore>,
    /// Base URL of the global tools API (search, contacts)
    pub tools_api_url: String,
    pub tools_api_timeout: Duration,
    pub subagents: SubAgentEndpoints,
    /// Duplicate-message suppression window
    pub duplicate_window: Duration,
}

/// Identity under which the orchestrator writes status updates.
pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";
pub const ORCHESTRATOR_AGENT_TYPE: &str = "orchestrator";

/// Create the default tool registry with all built-in tools.
pub fn default_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(web_search::WebSearchTool::new(
        deps.http.clone(),
        deps.tools_api_url.clone(),
        deps.tools_api_timeout,
    )));
    registry.register(Box::new(phone::OutboundCallTool::new(
        deps.http.clone(),
        deps.subagents.phone_url.clone(),
        deps.subagents.timeout,
    )));
    registry.register(Box::new(whatsapp::WhatsappTaskTool::new(
        deps.http.clone(),
        deps.subagents.whatsapp_url.clone(),
        deps.subagents.timeout,
    )));
    registry.register(Box::new(booking::BookFlightTool::new(
        deps.http.clone(),
        deps.subagents.booking_url.clone(),
        deps.subagents.timeout,
    )));
    registry.register(Box::new(messaging::SendMessageTool::new(
        Arc::new(messaging::HttpMessageTransport::new(
            deps.http.clone(),
            deps.subagents.whatsapp_url.clone(),
            deps.subagents.timeout,
        )),
        Arc::new(DuplicateCache::new(deps.duplicate_window)),
    )));
    registry.register(Box::new(contacts::GetContactsTool::new(
        deps.http.clone(),
        deps.tools_api_url.clone(),
        deps.tools_api_timeout,
    )));
    registry.register(Box::new(contacts::AddContactTool::new(
        deps.http.clone(),
        deps.tools_api_url.clone(),
        deps.tools_api_timeout,
    )));
    registry.register(Box::new(store_tools::AddMemoryTool::new(deps.memory.clone())));
    registry.register(Box::new(store_tools::SearchMemoryTool::new(
        deps.memory.clone(),
    )));
    registry.register(Box::new(store_tools::WriteStatusTool::new(
        deps.status.clone(),
    )));
    registry.register(Box::new(store_tools::ReadStatusTool::new(
        deps.status.clone(),
    )));
    registry.register(Box::new(control::WaitTool::default()));
    registry.register(Box::new(control::MarkCompleteTool::new(deps.status.clone())));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_store::{InMemoryMemoryStore, InMemoryStatusStore};

    fn test_deps() -> ToolDeps {
        ToolDeps {
            http: reqwest::Client::new(),
            status: Arc::new(InMemoryStatusStore::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
            tools_api_url: "http://127.0.0.1:8090".into(),
            tools_api_timeout: Duration::from_secs(5),
            subagents: SubAgentEndpoints {
                phone_url: "http://127.0.0.1:8091".into(),
                whatsapp_url: "http://127.0.0.1:8092".into(),
                booking_url: "http://127.0.0.1:8093".into(),
                timeout: Duration::from_secs(5),
            },
            duplicate_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn default_registry_has_all_tools() {
        let registry = default_registry(&test_deps());
        let mut names = registry.names();
        names.sort();
        assert_eq!(
            names,
            vec![
                "add_contact",
                "add_memory",
                "book_flight",
                "get_contacts",
                "mark_complete",
                "outbound_call",
                "read_status",
                "search_memory",
                "send_message",
                "wait",
                "web_search",
                "whatsapp_task",
                "write_status",
            ]
        );
    }

    #[test]
    fn contextual_params_declared() {
        let registry = default_registry(&test_deps());

        let by_name = |name: &str| registry.get(name).unwrap().contextual_params().to_vec();

        assert_eq!(by_name("whatsapp_task"), vec!["user_id", "conversation_id"]);
        assert_eq!(by_name("outbound_call"), vec!["conversation_id"]);
        assert_eq!(by_name("book_flight"), vec!["conversation_id"]);
        assert_eq!(by_name("mark_complete"), vec!["conversation_id"]);
        assert_eq!(by_name("write_status"), vec!["conversation_id"]);
        assert_eq!(by_name("read_status"), vec!["conversation_id"]);
        assert_eq!(by_name("add_memory"), vec!["user_id"]);
        assert_eq!(by_name("search_memory"), vec!["user_id"]);
        assert_eq!(by_name("get_contacts"), vec!["user_id"]);
        assert!(by_name("web_search").is_empty());
        assert!(by_name("wait").is_empty());
    }

    #[test]
    fn side_effecting_tools_declared() {
        let registry = default_registry(&test_deps());
        for name in ["outbound_call", "whatsapp_task", "book_flight", "send_message"] {
            assert!(
                registry.get(name).unwrap().has_side_effects(),
                "{name} should declare side effects"
            );
        }
        for name in ["web_search", "read_status", "search_memory", "wait"] {
            assert!(
                !registry.get(name).unwrap().has_side_effects(),
                "{name} should not declare side effects"
            );
        }
    }
}
