//! The agent execution loop.
//!
//! One `run` call owns one task from start to terminal state:
//!
//! ```text
//! PLANNING -> AWAITING_MODEL -> { DISPATCHING_TOOLS, WAITING, COMPLETED, FAILED }
//!                  ^                    |        |
//!                  +--------------------+--------+
//! ```
//!
//! The iteration cap is checked before every model call and is a hard
//! cap: exhaustion is a failure, never a silent success. Tool calls are
//! dispatched in model order, synchronously, with authoritative
//! `user_id`/`conversation_id` injected over whatever the model supplied.
//! A batch is always finished even after the completion tool succeeds —
//! later calls may depend on earlier side effects — but no new iteration
//! begins. Waits suspend only this run, and the status log is polled on
//! resume for information produced by sub-agents in the meantime.

use chrono::Utc;
use maestro_core::Provider;
use maestro_core::event::{DomainEvent, EventBus};
use maestro_core::provider::ProviderRequest;
use maestro_core::status::StatusFilter;
use maestro_core::task::{ActionKind, ExecutionEntry, RunResult, RunStatus, Task};
use maestro_core::tool::{COMPLETE_TOOL_NAME, ToolCall, ToolRegistry, WAIT_TOOL_NAME};
use maestro_core::transcript::{Transcript, Turn};
use maestro_store::StatusStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::policy::{self, CompletionPolicy, Decision, StateSnapshot};
use crate::{planner, prompt};

/// The agent execution loop. One instance is shared by all runs; all
/// per-run state lives on the stack of `run`.
pub struct TaskRunner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    status: Arc<dyn StatusStore>,
    events: Arc<EventBus>,
    policy: CompletionPolicy,
    model_retry_budget: u32,
    consecutive_wait_cap: Option<u32>,
    planning_enabled: bool,
    user_profile: Option<serde_json::Value>,
}

/// Per-run mutable state, owned exclusively by one `run` call.
struct RunState {
    transcript: Transcript,
    log: Vec<ExecutionEntry>,
    iterations: u32,
    consecutive_model_failures: u32,
    consecutive_waits: u32,
    seen_status_updates: usize,
    phone_calls: Vec<bool>,
    searches: Vec<bool>,
    key_facts_count: usize,
}

impl RunState {
    fn snapshot(&self, task: &Task) -> StateSnapshot {
        StateSnapshot {
            task: task.instruction.clone(),
            phone_calls_made: self.phone_calls.len(),
            successful_calls: self.phone_calls.iter().filter(|s| **s).count(),
            research_results: self.searches.len(),
            key_facts_count: self.key_facts_count,
            latest_call_success: self.phone_calls.last().copied().unwrap_or(false),
            has_research_data: self.searches.iter().any(|s| *s),
        }
    }
}

impl TaskRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        status: Arc<dyn StatusStore>,
        events: Arc<EventBus>,
        policy: CompletionPolicy,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.5,
            max_tokens: None,
            tools,
            status,
            events,
            policy,
            model_retry_budget: 1,
            consecutive_wait_cap: None,
            planning_enabled: false,
            user_profile: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Consecutive model failures tolerated before the run fails.
    pub fn with_model_retry_budget(mut self, budget: u32) -> Self {
        self.model_retry_budget = budget;
        self
    }

    /// Optional safety valve: fail the run after this many consecutive
    /// wait states. Off by default; the counter is diagnostic.
    pub fn with_consecutive_wait_cap(mut self, cap: Option<u32>) -> Self {
        self.consecutive_wait_cap = cap;
        self
    }

    /// Ask the model for an initial plan before the first iteration.
    pub fn with_planning(mut self, enabled: bool) -> Self {
        self.planning_enabled = enabled;
        self
    }

    /// Pre-fetched user profile data included in the initial context block.
    pub fn with_user_profile(mut self, profile: serde_json::Value) -> Self {
        self.user_profile = Some(profile);
        self
    }

    /// Run a task to its terminal state.
    pub async fn run(&self, task: &Task) -> RunResult {
        info!(
            conversation_id = %task.conversation_id,
            user_id = %task.user_id,
            max_iterations = task.max_iterations,
            "Agent run started"
        );
        self.events.publish(DomainEvent::RunStarted {
            conversation_id: task.conversation_id.clone(),
            user_id: task.user_id.clone(),
            timestamp: Utc::now(),
        });

        let mut state = RunState {
            transcript: Transcript::new(&task.conversation_id),
            log: Vec::new(),
            iterations: 0,
            consecutive_model_failures: 0,
            consecutive_waits: 0,
            seen_status_updates: 0,
            phone_calls: Vec::new(),
            searches: Vec::new(),
            key_facts_count: 0,
        };

        let definitions = self.tools.definitions();
        state
            .transcript
            .push(Turn::system(prompt::system_preamble(&definitions)));

        // PLANNING: best-effort initial plan, then the initial context block.
        let plan = if self.planning_enabled {
            planner::generate_plan(&self.provider, &self.model, self.temperature, &task.instruction)
                .await
        } else {
            Vec::new()
        };

        let initial_context = serde_json::json!({
            "original_task": task.instruction,
            "user_id": task.user_id,
            "conversation_id": task.conversation_id,
            "user_data": self.user_profile.clone().unwrap_or(serde_json::json!({})),
            "plan": plan,
        });
        state.transcript.push(Turn::user(format!(
            "Please complete the following task.\n\nTASK:\n{}\n\nINITIAL CONTEXT:\n{}",
            task.instruction, initial_context
        )));

        loop {
            // Hard cap, checked before every model call.
            if state.iterations >= task.max_iterations {
                return self.finish(
                    task,
                    state,
                    RunStatus::Failed,
                    "iteration budget exhausted".to_string(),
                );
            }
            state.iterations += 1;
            debug!(
                conversation_id = %task.conversation_id,
                iteration = state.iterations,
                "Agent loop iteration"
            );

            let request = ProviderRequest {
                model: self.model.clone(),
                turns: state.transcript.turns.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => {
                    state.consecutive_model_failures = 0;
                    response
                }
                Err(e) => {
                    warn!(iteration = state.iterations, error = %e, "Model call failed");
                    state.consecutive_model_failures += 1;
                    state.log.push(ExecutionEntry::new(
                        state.iterations,
                        ActionKind::Error,
                        format!("model call failed: {e}"),
                    ));
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: "model_call".into(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });

                    if state.consecutive_model_failures > self.model_retry_budget {
                        return self.finish(
                            task,
                            state,
                            RunStatus::Failed,
                            format!("model failed on consecutive iterations: {e}"),
                        );
                    }

                    // Deterministic fallback: consult the completion policy
                    // instead of aborting, and keep the loop moving.
                    let assessment = self.policy.assess(&state.snapshot(task)).await;
                    state.log.push(ExecutionEntry::new(
                        state.iterations,
                        ActionKind::PolicyDecision,
                        assessment.status_message.clone(),
                    ));
                    if assessment.is_complete {
                        return self.finish(
                            task,
                            state,
                            RunStatus::Completed,
                            assessment.status_message,
                        );
                    }
                    state.transcript.push(Turn::assistant(format!(
                        "Analyzing task progress: {}",
                        assessment.status_message
                    )));
                    continue;
                }
            };

            state.log.push(ExecutionEntry::new(
                state.iterations,
                ActionKind::ModelCall,
                format!(
                    "{} tool call(s), {} chars of text",
                    response.turn.tool_calls.len(),
                    response.turn.content.len()
                ),
            ));
            self.events.publish(DomainEvent::ModelResponded {
                conversation_id: task.conversation_id.clone(),
                model: response.model.clone(),
                iteration: state.iterations,
                tokens_used: response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                timestamp: Utc::now(),
            });

            match policy::interpret_turn(&response.turn) {
                Decision::ToolCalls(calls) => {
                    state.transcript.push(response.turn);

                    let batch = self.dispatch_batch(task, &mut state, calls).await;

                    if batch.outbound_action {
                        state.consecutive_waits = 0;
                    }

                    if batch.completed {
                        return self.finish(
                            task,
                            state,
                            RunStatus::Completed,
                            "task marked complete".to_string(),
                        );
                    }

                    // Ask the completion policy whether the recorded
                    // results already satisfy the task.
                    let assessment = self.policy.assess(&state.snapshot(task)).await;
                    state.log.push(ExecutionEntry::new(
                        state.iterations,
                        ActionKind::PolicyDecision,
                        assessment.status_message.clone(),
                    ));
                    if assessment.is_complete {
                        return self.finish(
                            task,
                            state,
                            RunStatus::Completed,
                            assessment.status_message,
                        );
                    }

                    if let Some(duration_secs) = batch.wait_requested
                        && let Err(reason) = self.wait(task, &mut state, duration_secs).await
                    {
                        return self.finish(task, state, RunStatus::Failed, reason);
                    }
                }
                Decision::Complete { message } => {
                    state.transcript.push(response.turn);
                    return self.finish(task, state, RunStatus::Completed, message);
                }
                Decision::Failed { reason } => {
                    state.transcript.push(response.turn);
                    return self.finish(task, state, RunStatus::Failed, reason);
                }
                Decision::Continue => {
                    // Intermediate reasoning, not an error.
                    state.transcript.push(response.turn);
                }
            }
        }
    }

    async fn dispatch_batch(
        &self,
        task: &Task,
        state: &mut RunState,
        calls: Vec<ToolCall>,
    ) -> BatchOutcome {
        let mut batch = BatchOutcome::default();

        for mut call in calls {
            self.inject_context(task, &mut call);

            state.log.push(ExecutionEntry::new(
                state.iterations,
                ActionKind::ToolCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                },
                "dispatched".to_string(),
            ));

            let started = Instant::now();
            let outcome = self.tools.dispatch(&call).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            self.events.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: outcome.success,
                duration_ms,
                timestamp: Utc::now(),
            });
            if let Some(entry) = state.log.last_mut() {
                entry.outcome = if outcome.success {
                    format!("ok ({duration_ms}ms)")
                } else {
                    format!("failed ({duration_ms}ms): {}", outcome.output)
                };
            }

            // Progress tallies for the completion policy.
            match call.name.as_str() {
                "web_search" => {
                    state.searches.push(outcome.success);
                    if outcome.success {
                        state.key_facts_count += 1;
                    }
                }
                "outbound_call" => {
                    state.phone_calls.push(outcome.success);
                    if outcome.success {
                        state.key_facts_count += 1;
                    }
                }
                _ => {}
            }

            if outcome.success {
                if call.name == WAIT_TOOL_NAME {
                    batch.wait_requested = outcome
                        .data
                        .as_ref()
                        .and_then(|d| d["duration_secs"].as_u64())
                        .or(Some(task.wait_secs));
                }
                // Completion ends the run after the batch finishes; later
                // calls in this batch still execute.
                if call.name == COMPLETE_TOOL_NAME {
                    batch.completed = true;
                }
                if self
                    .tools
                    .get(&call.name)
                    .is_some_and(|t| t.has_side_effects())
                {
                    batch.outbound_action = true;
                }
            }

            state
                .transcript
                .push(Turn::tool_result(&call.id, &outcome.output));
        }

        batch
    }

    /// Overwrite contextual parameters with the task's authoritative
    /// values. Model-supplied values for these are never trusted.
    fn inject_context(&self, task: &Task, call: &mut ToolCall) {
        let Some(tool) = self.tools.get(&call.name) else {
            return;
        };
        if !call.arguments.is_object() {
            call.arguments = serde_json::json!({});
        }
        if let Some(args) = call.arguments.as_object_mut() {
            for param in tool.contextual_params() {
                let value = match *param {
                    "user_id" => task.user_id.clone(),
                    "conversation_id" => task.conversation_id.clone(),
                    other => {
                        warn!(tool = %call.name, param = other, "Unknown contextual parameter");
                        continue;
                    }
                };
                args.insert(param.to_string(), serde_json::Value::String(value));
            }
        }
    }

    /// Suspend this run for a bounded duration, then poll the status log
    /// for information produced by sub-agents in the meantime.
    async fn wait(
        &self,
        task: &Task,
        state: &mut RunState,
        duration_secs: u64,
    ) -> Result<(), String> {
        state.consecutive_waits += 1;
        if let Some(cap) = self.consecutive_wait_cap
            && state.consecutive_waits > cap
        {
            return Err(format!(
                "stuck waiting: {} consecutive waits without an outbound action",
                state.consecutive_waits
            ));
        }

        state.log.push(ExecutionEntry::new(
            state.iterations,
            ActionKind::Wait { duration_secs },
            format!("consecutive waits: {}", state.consecutive_waits),
        ));
        info!(
            conversation_id = %task.conversation_id,
            duration_secs,
            consecutive = state.consecutive_waits,
            "Waiting for external progress"
        );

        tokio::time::sleep(Duration::from_secs(duration_secs)).await;

        // Best-effort status poll; unavailability means "no new information".
        match self
            .status
            .read(&task.conversation_id, &StatusFilter::default())
            .await
        {
            Ok(updates) => {
                if updates.len() > state.seen_status_updates {
                    let fresh: Vec<String> = updates[state.seen_status_updates..]
                        .iter()
                        .map(|u| format!("[{}] {}: {}", u.agent_type, u.agent_id, u.update))
                        .collect();
                    state.seen_status_updates = updates.len();
                    state.transcript.push(Turn::system(format!(
                        "NEW STATUS UPDATES:\n{}",
                        fresh.join("\n")
                    )));
                }
            }
            Err(e) => {
                warn!(conversation_id = %task.conversation_id, error = %e, "Status poll failed");
                state.log.push(ExecutionEntry::new(
                    state.iterations,
                    ActionKind::Error,
                    format!("status poll failed: {e}"),
                ));
            }
        }

        Ok(())
    }

    fn finish(
        &self,
        task: &Task,
        state: RunState,
        status: RunStatus,
        final_message: String,
    ) -> RunResult {
        info!(
            conversation_id = %task.conversation_id,
            ?status,
            iterations = state.iterations,
            "Agent run finished: {final_message}"
        );
        self.events.publish(DomainEvent::RunFinished {
            conversation_id: task.conversation_id.clone(),
            status,
            iterations: state.iterations,
            timestamp: Utc::now(),
        });

        RunResult {
            status,
            iterations: state.iterations,
            transcript: state.transcript,
            execution_log: state.log,
            final_message,
        }
    }
}

#[derive(Default)]
struct BatchOutcome {
    completed: bool,
    wait_requested: Option<u64>,
    outbound_action: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_core::error::{ProviderError, ToolError};
    use maestro_core::provider::ProviderResponse;
    use maestro_core::tool::{Tool, ToolOutcome};
    use maestro_core::transcript::TurnToolCall;
    use maestro_store::{InMemoryStatusStore, StatusStore};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One scripted model step.
    #[derive(Clone)]
    enum Step {
        Text(String),
        Calls(Vec<(&'static str, serde_json::Value)>),
        Fail,
    }

    /// A provider that replays a script, then keeps emitting plain text.
    struct ScriptedProvider {
        steps: Mutex<Vec<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock().unwrap();
                if steps.is_empty() {
                    Step::Text("Still working through the steps.".into())
                } else {
                    steps.remove(0)
                }
            };

            match step {
                Step::Fail => Err(ProviderError::Network("provider down".into())),
                Step::Text(text) => Ok(ProviderResponse {
                    turn: Turn::assistant(text),
                    usage: None,
                    model: "scripted".into(),
                }),
                Step::Calls(calls) => {
                    let mut turn = Turn::assistant("");
                    turn.tool_calls = calls
                        .into_iter()
                        .enumerate()
                        .map(|(i, (name, args))| TurnToolCall {
                            id: format!("call_{i}"),
                            name: name.into(),
                            arguments: args.to_string(),
                        })
                        .collect();
                    Ok(ProviderResponse {
                        turn,
                        usage: None,
                        model: "scripted".into(),
                    })
                }
            }
        }
    }

    /// A tool that records the arguments it actually received.
    struct RecordingTool {
        name: &'static str,
        contextual: &'static [&'static str],
        side_effects: bool,
        succeed: bool,
        received: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl RecordingTool {
        fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<serde_json::Value>>>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name,
                    contextual: &[],
                    side_effects: false,
                    succeed: true,
                    received: received.clone(),
                },
                received,
            )
        }

        fn contextual(mut self, params: &'static [&'static str]) -> Self {
            self.contextual = params;
            self
        }

        fn side_effecting(mut self) -> Self {
            self.side_effects = true;
            self
        }

        fn failing(mut self) -> Self {
            self.succeed = false;
            self
        }
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn contextual_params(&self) -> &[&str] {
            self.contextual
        }
        fn has_side_effects(&self) -> bool {
            self.side_effects
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
            self.received.lock().unwrap().push(arguments);
            if self.succeed {
                Ok(ToolOutcome::ok("ok"))
            } else {
                Ok(ToolOutcome::err("tool failed"))
            }
        }
    }

    /// A mark_complete stand-in that always succeeds.
    struct CompleteTool;

    #[async_trait]
    impl Tool for CompleteTool {
        fn name(&self) -> &str {
            COMPLETE_TOOL_NAME
        }
        fn description(&self) -> &str {
            "complete"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn contextual_params(&self) -> &[&str] {
            &["conversation_id"]
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::ok("TASK_COMPLETED"))
        }
    }

    /// A wait directive stand-in.
    struct WaitDirectiveTool;

    #[async_trait]
    impl Tool for WaitDirectiveTool {
        fn name(&self) -> &str {
            WAIT_TOOL_NAME
        }
        fn description(&self) -> &str {
            "wait"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
            let secs = arguments["duration_seconds"].as_u64().unwrap_or(1);
            Ok(ToolOutcome::ok("waiting").with_data(serde_json::json!({
                "wait_requested": true,
                "duration_secs": secs,
            })))
        }
    }

    fn runner_with(
        provider: Arc<ScriptedProvider>,
        registry: ToolRegistry,
    ) -> (TaskRunner, Arc<InMemoryStatusStore>) {
        let status = Arc::new(InMemoryStatusStore::new());
        let runner = TaskRunner::new(
            provider,
            "test-model",
            Arc::new(registry),
            status.clone(),
            Arc::new(EventBus::default()),
            CompletionPolicy::deterministic(),
        );
        (runner, status)
    }

    fn task() -> Task {
        Task::new("do the thing", "user_1", "conv_1").with_max_iterations(5)
    }

    #[tokio::test]
    async fn contextual_params_overwrite_model_values() {
        let (tool, received) = RecordingTool::new("whatsapp_probe");
        let tool = tool.contextual(&["user_id", "conversation_id"]);
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(tool));

        let provider = ScriptedProvider::new(vec![
            Step::Calls(vec![(
                "whatsapp_probe",
                // The model tries to redirect to another user
                serde_json::json!({"task": "hi", "user_id": "attacker", "conversation_id": "other"}),
            )]),
            Step::Text("Task completed.".into()),
        ]);

        let (runner, _) = runner_with(provider, registry);
        let result = runner.run(&task()).await;

        assert_eq!(result.status, RunStatus::Completed);
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["user_id"], "user_1");
        assert_eq!(received[0]["conversation_id"], "conv_1");
        assert_eq!(received[0]["task"], "hi");
    }

    #[tokio::test]
    async fn iteration_budget_is_a_hard_cap() {
        let provider = ScriptedProvider::new(vec![]);
        let (runner, _) = runner_with(provider.clone(), ToolRegistry::new());

        let task = Task::new("never finishes", "user_1", "conv_1").with_max_iterations(3);
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.final_message.contains("iteration budget exhausted"));
        assert_eq!(result.iterations, 3);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn scenario_search_only_task_completes_via_fallback() {
        let (search, _) = RecordingTool::new("web_search");
        let (call, call_received) = RecordingTool::new("outbound_call");
        let (message, message_received) = RecordingTool::new("send_message");
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(search));
        registry.register(Box::new(call.side_effecting()));
        registry.register(Box::new(message.side_effecting()));

        let provider = ScriptedProvider::new(vec![Step::Calls(vec![(
            "web_search",
            serde_json::json!({"query": "rust conference 2026"}),
        )])]);

        let (runner, _) = runner_with(provider, registry);
        let task = Task::new(
            "search for the next Rust conference and report back",
            "user_1",
            "conv_1",
        );
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.final_message.contains("Research information gathered"));
        // No call or message tool was ever invoked
        assert!(call_received.lock().unwrap().is_empty());
        assert!(message_received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_call_task_completes_only_after_successful_call() {
        let (call_tool, _) = RecordingTool::new("outbound_call");
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(call_tool.side_effecting()));

        let provider = ScriptedProvider::new(vec![
            Step::Text("Planning the call now.".into()),
            Step::Calls(vec![(
                "outbound_call",
                serde_json::json!({"task": "discuss Y", "phone_number": "+447874943523"}),
            )]),
        ]);

        let (runner, _) = runner_with(provider, registry);
        let task = Task::new("call the client about Y", "user_1", "conv_1");
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.final_message.contains("Phone call executed successfully"));
        // Not completed on iteration 1 (no call yet) — took two iterations
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn failed_call_does_not_complete_call_task() {
        let (call_tool, _) = RecordingTool::new("outbound_call");
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(call_tool.failing().side_effecting()));

        let provider = ScriptedProvider::new(vec![Step::Calls(vec![(
            "outbound_call",
            serde_json::json!({"task": "discuss", "phone_number": "123"}),
        )])]);

        let (runner, _) = runner_with(provider, registry);
        let task = Task::new("call the client", "user_1", "conv_1").with_max_iterations(2);
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.final_message.contains("iteration budget exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_reply_never_arrives_fails_at_budget() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(WaitDirectiveTool));

        // Every iteration: wait again.
        let provider = ScriptedProvider::new(vec![
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({"duration_seconds": 30}))]),
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({"duration_seconds": 30}))]),
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({"duration_seconds": 30}))]),
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({"duration_seconds": 30}))]),
        ]);

        let (runner, _) = runner_with(provider.clone(), registry);
        let task = Task::new("ask Bob whether 8pm works and report his answer", "user_1", "conv_1")
            .with_max_iterations(4);
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.final_message.contains("iteration budget exhausted"));
        assert_eq!(provider.call_count(), 4);

        // The loop alternated model calls and waits the whole way down
        let waits = result
            .execution_log
            .iter()
            .filter(|e| matches!(e.action, ActionKind::Wait { .. }))
            .count();
        assert_eq!(waits, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_wait_cap_fails_stuck_runs() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(WaitDirectiveTool));

        let provider = ScriptedProvider::new(vec![
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({}))]),
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({}))]),
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({}))]),
        ]);

        let status = Arc::new(InMemoryStatusStore::new());
        let runner = TaskRunner::new(
            provider,
            "test-model",
            Arc::new(registry),
            status,
            Arc::new(EventBus::default()),
            CompletionPolicy::deterministic(),
        )
        .with_consecutive_wait_cap(Some(2));

        let task = Task::new("wait around", "user_1", "conv_1").with_max_iterations(10);
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.final_message.contains("stuck waiting"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resume_surfaces_new_status_updates() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(WaitDirectiveTool));

        let provider = ScriptedProvider::new(vec![
            Step::Calls(vec![(WAIT_TOOL_NAME, serde_json::json!({"duration_seconds": 5}))]),
            Step::Text("Task completed: Bob confirmed 8pm.".into()),
        ]);

        let (runner, status) = runner_with(provider, registry);
        // A sub-agent wrote an update before the loop resumes
        status
            .write("whatsapp_agent", "whatsapp", "conv_1", "Bob replied: 8pm works")
            .await
            .unwrap();

        let result = runner.run(&task()).await;
        assert_eq!(result.status, RunStatus::Completed);

        let surfaced = result.transcript.turns.iter().any(|t| {
            t.content.contains("NEW STATUS UPDATES") && t.content.contains("Bob replied")
        });
        assert!(surfaced, "status updates should be injected into the transcript");
    }

    #[tokio::test]
    async fn unknown_tool_is_recorded_not_fatal() {
        let provider = ScriptedProvider::new(vec![
            Step::Calls(vec![("no_such_tool", serde_json::json!({}))]),
            Step::Text("Task completed.".into()),
        ]);

        let (runner, _) = runner_with(provider, ToolRegistry::new());
        let result = runner.run(&task()).await;

        assert_eq!(result.status, RunStatus::Completed);
        let error_result = result
            .transcript
            .turns
            .iter()
            .find(|t| t.content.contains("unknown tool"));
        assert!(error_result.is_some());
    }

    #[tokio::test]
    async fn completion_tool_finishes_batch_before_exit() {
        let (after_tool, after_received) = RecordingTool::new("write_probe");
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CompleteTool));
        registry.register(Box::new(after_tool));

        let provider = ScriptedProvider::new(vec![Step::Calls(vec![
            (COMPLETE_TOOL_NAME, serde_json::json!({"justification": "done"})),
            ("write_probe", serde_json::json!({"note": "final"})),
        ])]);

        let (runner, _) = runner_with(provider.clone(), registry);
        let result = runner.run(&task()).await;

        assert_eq!(result.status, RunStatus::Completed);
        // The call after mark_complete in the same batch still ran
        assert_eq!(after_received.lock().unwrap().len(), 1);
        // But no new iteration began
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn single_model_failure_recovers() {
        let provider = ScriptedProvider::new(vec![
            Step::Fail,
            Step::Text("Task completed.".into()),
        ]);

        let (runner, _) = runner_with(provider, ToolRegistry::new());
        let result = runner.run(&task()).await;
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn consecutive_model_failures_exhaust_retry_budget() {
        let provider = ScriptedProvider::new(vec![Step::Fail, Step::Fail, Step::Fail]);

        let (runner, _) = runner_with(provider.clone(), ToolRegistry::new());
        let result = runner.run(&task()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.final_message.contains("consecutive"));
        // Default budget 1: first failure recovered, second fatal
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn execution_log_covers_every_iteration() {
        let (search, _) = RecordingTool::new("web_search");
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(search));

        let provider = ScriptedProvider::new(vec![
            Step::Text("Thinking about the approach.".into()),
            Step::Calls(vec![("web_search", serde_json::json!({"query": "x"}))]),
        ]);

        let (runner, _) = runner_with(provider, registry);
        let task = Task::new("find information about x", "user_1", "conv_1");
        let result = runner.run(&task).await;

        assert_eq!(result.status, RunStatus::Completed);
        let model_calls = result
            .execution_log
            .iter()
            .filter(|e| matches!(e.action, ActionKind::ModelCall))
            .count();
        assert_eq!(model_calls as u32, result.iterations);

        let tool_calls = result
            .execution_log
            .iter()
            .filter(|e| matches!(e.action, ActionKind::ToolCall { .. }))
            .count();
        assert_eq!(tool_calls, 1);
    }
}
