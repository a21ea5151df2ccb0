//! Maestro CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the HTTP gateway (task intake + webhooks)
//! - `run`    — Run a single task to completion from the terminal
//! - `status` — Read a conversation's status log

use anyhow::Context;
use clap::{Parser, Subcommand};
use maestro_agent::{CompletionPolicy, ProcessedMessages, TaskRunner};
use maestro_config::AppConfig;
use maestro_core::event::EventBus;
use maestro_core::status::StatusFilter;
use maestro_core::task::Task;
use maestro_gateway::GatewayState;
use maestro_providers::{AnthropicProvider, FallbackProvider};
use maestro_store::http::HttpStoreConfig;
use maestro_store::{HttpMemoryStore, HttpStatusStore, MemoryStore, StatusStore};
use maestro_tools::{SubAgentEndpoints, ToolDeps};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "maestro",
    about = "Maestro — multi-agent task orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(short, long, global = true, default_value = "maestro.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single task to completion
    Run {
        /// The task instruction
        task: String,

        /// The owning user id
        #[arg(short, long)]
        user_id: String,

        /// The conversation id (generated when omitted)
        #[arg(long)]
        conversation_id: Option<String>,

        /// Override the iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Read a conversation's status log
    Status {
        /// The conversation id
        conversation_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Run {
            task,
            user_id,
            conversation_id,
            max_iterations,
        } => run_task(config, task, user_id, conversation_id, max_iterations).await,
        Commands::Status { conversation_id } => read_status(config, conversation_id).await,
    }
}

/// Everything the commands need, built once from config.
struct Components {
    runner: Arc<TaskRunner>,
    status: Arc<dyn StatusStore>,
    processed: Arc<ProcessedMessages>,
}

async fn build_components(config: &AppConfig) -> anyhow::Result<Components> {
    let http = reqwest::Client::new();

    let store_config = HttpStoreConfig {
        base_url: config.store.base_url.clone(),
        timeout: Duration::from_secs(config.store.timeout_secs),
        read_retries: config.store.read_retries,
        retry_backoff: Duration::from_millis(config.store.retry_backoff_ms),
    };
    let status: Arc<dyn StatusStore> =
        Arc::new(HttpStatusStore::new(http.clone(), store_config.clone()));
    let memory: Arc<dyn MemoryStore> =
        Arc::new(HttpMemoryStore::new(http.clone(), store_config));

    let deps = ToolDeps {
        http: http.clone(),
        status: status.clone(),
        memory,
        tools_api_url: config.store.base_url.clone(),
        tools_api_timeout: Duration::from_secs(config.store.timeout_secs),
        subagents: SubAgentEndpoints {
            phone_url: config.subagents.phone_url.clone(),
            whatsapp_url: config.subagents.whatsapp_url.clone(),
            booking_url: config.subagents.booking_url.clone(),
            timeout: Duration::from_secs(config.subagents.timeout_secs),
        },
        duplicate_window: Duration::from_secs(config.idempotency.duplicate_window_secs),
    };
    let registry = Arc::new(maestro_tools::default_registry(&deps));

    let api_key = config
        .provider
        .api_key
        .clone()
        .context("no provider API key configured (set MAESTRO_API_KEY)")?;
    let provider_timeout = Duration::from_secs(config.provider.timeout_secs);
    let anthropic = Arc::new(
        AnthropicProvider::new(api_key, provider_timeout)
            .with_base_url(config.provider.base_url.clone()),
    );
    let provider: Arc<dyn maestro_core::Provider> = Arc::new(
        FallbackProvider::new("default").add(anthropic, provider_timeout),
    );

    let policy = CompletionPolicy::model_backed(provider.clone(), config.provider.model.clone());

    let runner = TaskRunner::new(
        provider,
        config.provider.model.clone(),
        registry,
        status.clone(),
        Arc::new(EventBus::default()),
        policy,
    )
    .with_temperature(config.provider.temperature)
    .with_model_retry_budget(config.agent.model_retry_budget)
    .with_consecutive_wait_cap(config.agent.consecutive_wait_cap)
    .with_planning(true);

    let processed = match &config.idempotency.processed_db_path {
        Some(path) => Arc::new(
            ProcessedMessages::open(path)
                .await
                .with_context(|| format!("opening processed-message db at {path}"))?,
        ),
        None => Arc::new(ProcessedMessages::in_memory()),
    };

    Ok(Components {
        runner: Arc::new(runner),
        status,
        processed,
    })
}

async fn serve(config: AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    let components = build_components(&config).await?;

    let state = Arc::new(GatewayState {
        runner: components.runner,
        status: components.status,
        processed: components.processed,
        default_max_iterations: config.agent.max_iterations,
    });

    let port = port.unwrap_or(config.gateway.port);
    maestro_gateway::serve(state, &config.gateway.host, port)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

async fn run_task(
    config: AppConfig,
    instruction: String,
    user_id: String,
    conversation_id: Option<String>,
    max_iterations: Option<u32>,
) -> anyhow::Result<()> {
    let components = build_components(&config).await?;

    let conversation_id =
        conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let task = Task::new(instruction, user_id, &conversation_id)
        .with_max_iterations(max_iterations.unwrap_or(config.agent.max_iterations))
        .with_wait_secs(config.agent.wait_secs);

    let result = components.runner.run(&task).await;

    println!("conversation: {conversation_id}");
    println!("status:       {:?}", result.status);
    println!("iterations:   {}", result.iterations);
    println!("result:       {}", result.final_message);
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&result.execution_log).unwrap_or_default()
    );
    Ok(())
}

async fn read_status(config: AppConfig, conversation_id: String) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let store = HttpStatusStore::new(
        http,
        HttpStoreConfig {
            base_url: config.store.base_url.clone(),
            timeout: Duration::from_secs(config.store.timeout_secs),
            read_retries: config.store.read_retries,
            retry_backoff: Duration::from_millis(config.store.retry_backoff_ms),
        },
    );

    let updates = store
        .read(&conversation_id, &StatusFilter::default())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if updates.is_empty() {
        println!("no status updates for {conversation_id}");
        return Ok(());
    }
    for update in updates {
        println!(
            "[{}] {} ({}): {}",
            update.timestamp, update.agent_id, update.agent_type, update.update
        );
    }
    Ok(())
}
