//! HTTP gateway for Maestro.
//!
//! Exposes the start-task entrypoint and the webhooks sub-agents call
//! back on. Task execution happens out of band: `/invoke` returns 202
//! immediately and the run proceeds in a spawned task, with results
//! discoverable through the status log.
//!
//! Built on Axum.

pub mod webhook;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use maestro_agent::{ProcessedMessages, TaskRunner};
use maestro_agent::dedupe::InboundMessage;
use maestro_core::task::Task;
use maestro_store::StatusStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runner: Arc<TaskRunner>,
    pub status: Arc<dyn StatusStore>,
    pub processed: Arc<ProcessedMessages>,
    /// Default iteration cap for tasks that don't specify one
    pub default_max_iterations: u32,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/invoke", post(invoke_handler))
        .route("/webhooks/task-complete", post(webhook::task_complete_handler))
        .route("/webhooks/inbound-message", post(inbound_message_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn serve(
    state: SharedState,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Request body for the start-task entrypoint.
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub task: String,
    pub user_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

/// Acknowledgment returned immediately; execution continues out of band.
#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub task_id: String,
    pub user_id: String,
    pub conversation_id: String,
}

pub async fn invoke_handler(
    State(state): State<SharedState>,
    Json(request): Json<InvokeRequest>,
) -> Result<(StatusCode, Json<InvokeResponse>), (StatusCode, String)> {
    for (name, value) in [
        ("task", &request.task),
        ("user_id", &request.user_id),
        ("conversation_id", &request.conversation_id),
    ] {
        if value.trim().is_empty() {
            return Err((StatusCode::BAD_REQUEST, format!("{name} cannot be empty")));
        }
    }

    let task_id = Uuid::new_v4().to_string();
    let task = Task::new(
        request.task.clone(),
        request.user_id.clone(),
        request.conversation_id.clone(),
    )
    .with_max_iterations(
        request
            .max_iterations
            .unwrap_or(state.default_max_iterations),
    );

    info!(
        task_id = %task_id,
        user_id = %request.user_id,
        conversation_id = %request.conversation_id,
        "Accepted agent task"
    );

    let runner = state.runner.clone();
    let spawned_task_id = task_id.clone();
    tokio::spawn(async move {
        let result = runner.run(&task).await;
        info!(
            task_id = %spawned_task_id,
            status = ?result.status,
            iterations = result.iterations,
            "Background run finished: {}",
            result.final_message
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(InvokeResponse {
            status: "accepted",
            message: "Agent task has been accepted and is running in the background.",
            task_id,
            user_id: request.user_id,
            conversation_id: request.conversation_id,
        }),
    ))
}

/// Request body for the inbound-message webhook.
#[derive(Debug, Deserialize)]
pub struct InboundMessageRequest {
    pub conversation_id: String,
    #[serde(flatten)]
    pub message: InboundMessage,
}

#[derive(Debug, Serialize)]
pub struct InboundMessageResponse {
    pub processed: bool,
    pub message_id: String,
}

/// Receive an external reply. Delivery is at-least-once, so the message
/// is claimed against the durable processed set; only the first delivery
/// produces a status update for waiting orchestrators to observe.
pub async fn inbound_message_handler(
    State(state): State<SharedState>,
    Json(request): Json<InboundMessageRequest>,
) -> Json<InboundMessageResponse> {
    let message_id = request.message.message_id();

    if request.message.is_stale(chrono::Utc::now()) {
        state.processed.mark_processed(&message_id).await;
        info!(message_id = %message_id, "Skipping stale inbound message");
        return Json(InboundMessageResponse {
            processed: false,
            message_id,
        });
    }

    if !state.processed.claim(&message_id).await {
        info!(message_id = %message_id, "Skipping already-processed inbound message");
        return Json(InboundMessageResponse {
            processed: false,
            message_id,
        });
    }

    let update = format!(
        "New message from {}: {}",
        request.message.sender, request.message.content
    );
    if let Err(e) = state
        .status
        .write("whatsapp_inbound", "whatsapp", &request.conversation_id, &update)
        .await
    {
        warn!(
            conversation_id = %request.conversation_id,
            error = %e,
            "Failed to record inbound message status"
        );
    }

    Json(InboundMessageResponse {
        processed: true,
        message_id,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_agent::CompletionPolicy;
    use maestro_core::Provider;
    use maestro_core::error::ProviderError;
    use maestro_core::event::EventBus;
    use maestro_core::provider::{ProviderRequest, ProviderResponse};
    use maestro_core::status::StatusFilter;
    use maestro_core::tool::ToolRegistry;
    use maestro_core::transcript::Turn;
    use maestro_store::InMemoryStatusStore;

    struct DoneProvider;

    #[async_trait]
    impl Provider for DoneProvider {
        fn name(&self) -> &str {
            "done"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                turn: Turn::assistant("Task completed."),
                usage: None,
                model: "done".into(),
            })
        }
    }

    pub(crate) fn test_state() -> (SharedState, Arc<InMemoryStatusStore>) {
        let status = Arc::new(InMemoryStatusStore::new());
        let runner = TaskRunner::new(
            Arc::new(DoneProvider),
            "test-model",
            Arc::new(ToolRegistry::new()),
            status.clone(),
            Arc::new(EventBus::default()),
            CompletionPolicy::deterministic(),
        );
        let state = Arc::new(GatewayState {
            runner: Arc::new(runner),
            status: status.clone(),
            processed: Arc::new(ProcessedMessages::in_memory()),
            default_max_iterations: 10,
        });
        (state, status)
    }

    #[tokio::test]
    async fn invoke_returns_accepted_immediately() {
        let (state, _) = test_state();
        let response = invoke_handler(
            State(state),
            Json(InvokeRequest {
                task: "find a plumber".into(),
                user_id: "user_1".into(),
                conversation_id: "conv_1".into(),
                max_iterations: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0, StatusCode::ACCEPTED);
        assert_eq!(response.1.status, "accepted");
        assert!(!response.1.task_id.is_empty());
    }

    #[tokio::test]
    async fn invoke_rejects_empty_task() {
        let (state, _) = test_state();
        let result = invoke_handler(
            State(state),
            Json(InvokeRequest {
                task: "  ".into(),
                user_id: "user_1".into(),
                conversation_id: "conv_1".into(),
                max_iterations: None,
            }),
        )
        .await;

        let err = result.err().unwrap();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.contains("task"));
    }

    #[tokio::test]
    async fn inbound_message_processed_exactly_once() {
        let (state, status) = test_state();

        let request = || InboundMessageRequest {
            conversation_id: "conv_1".into(),
            message: InboundMessage {
                id: Some("wamid.XYZ".into()),
                sender: "447874943523".into(),
                chat: "447874943523@c.us".into(),
                content: "8pm works for me".into(),
                timestamp: chrono::Utc::now(),
            },
        };

        let first = inbound_message_handler(State(state.clone()), Json(request())).await;
        assert!(first.0.processed);

        let second = inbound_message_handler(State(state), Json(request())).await;
        assert!(!second.0.processed);

        // Exactly one downstream action: one status update written
        let updates = status.read("conv_1", &StatusFilter::default()).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].update.contains("8pm works"));
    }

    #[tokio::test]
    async fn stale_inbound_message_is_skipped_but_marked() {
        let (state, status) = test_state();

        let message = InboundMessage {
            id: Some("old_one".into()),
            sender: "447874943523".into(),
            chat: "chat".into(),
            content: "ancient reply".into(),
            timestamp: chrono::Utc::now() - chrono::Duration::seconds(300),
        };

        let response = inbound_message_handler(
            State(state.clone()),
            Json(InboundMessageRequest {
                conversation_id: "conv_1".into(),
                message,
            }),
        )
        .await;

        assert!(!response.0.processed);
        assert!(state.processed.is_processed("old_one").await);

        let updates = status.read("conv_1", &StatusFilter::default()).await.unwrap();
        assert!(updates.is_empty());
    }
}
