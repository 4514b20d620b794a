//! The conversation orchestrator.
//!
//! One run drives an explicit state machine:
//!
//! ```text
//! AwaitingBackend -> Interpreting -> DispatchingTools -> AwaitingBackend ...
//!                                 \-> Done
//! AwaitingBackend -> Failed            (transport / auth / empty response)
//! AwaitingBackend -> BudgetExhausted   (turns_used == max_turns)
//! ```
//!
//! Tool failures never leave the loop: they come back from the registry as
//! error results, are appended as tool messages, and the backend gets
//! another turn to recover.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use stockchat_config::AppConfig;
use stockchat_core::error::ProviderError;
use stockchat_core::message::{Conversation, Message, ToolCallRequest};
use stockchat_core::provider::{NormalizedResponse, Provider, ProviderRequest, Usage};
use stockchat_core::tool::{ToolDefinition, ToolRegistry};
use stockchat_providers::{ProviderKind, ProviderRouter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::outcome::{RunOutcome, TerminalState};

/// Injected when the caller's conversation carries no system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional stock analysis assistant with access to a database of listed stocks. \
Use the available tools to look up real data before answering: search for stocks by code or name, \
read stock details and daily history, screen stocks by valuation, or run read-only SQL for custom analysis. \
Base every figure you quote on tool results, say so when the data is missing, and answer in the user's language.";

enum RunState {
    AwaitingBackend,
    Interpreting(NormalizedResponse),
    DispatchingTools(Vec<ToolCallRequest>),
    Done,
    Failed(ProviderError),
    BudgetExhausted,
}

/// Mutable state of a single run. Never shared between runs.
struct Run {
    id: String,
    conversation: Conversation,
    initial_len: usize,
    turns_used: u32,
    max_turns: u32,
    latest_content: Option<String>,
    usage: Usage,
}

impl Run {
    fn add_usage(&mut self, usage: Option<Usage>) {
        if let Some(u) = usage {
            self.usage.prompt_tokens += u.prompt_tokens;
            self.usage.completion_tokens += u.completion_tokens;
            self.usage.total_tokens += u.total_tokens;
        }
    }

    fn finish(self, terminal_state: TerminalState) -> RunOutcome {
        let reason_code = match &terminal_state {
            TerminalState::Done => None,
            TerminalState::Failed { code, .. } => Some(code.clone()),
            TerminalState::BudgetExhausted => Some("budget_exhausted".to_string()),
        };

        info!(
            run_id = %self.id,
            state = terminal_state.as_str(),
            turns = self.turns_used,
            max_turns = self.max_turns,
            tokens = self.usage.total_tokens,
            "Run finished"
        );

        RunOutcome {
            run_id: self.id,
            final_content: self.latest_content,
            terminal_state,
            turns_used: self.turns_used,
            max_turns: self.max_turns,
            reason_code,
            conversation: self.conversation,
            usage: self.usage,
            initial_len: self.initial_len,
        }
    }
}

/// Drives runs against whichever backend the caller selects.
///
/// Holds only shared, read-only collaborators, so one orchestrator can
/// serve any number of concurrent runs.
pub struct Orchestrator {
    router: Arc<ProviderRouter>,
    tools: Arc<ToolRegistry>,
    temperature: f32,
    max_tokens: Option<u32>,
    backend_timeout: Option<Duration>,
    system_prompt: String,
}

impl Orchestrator {
    pub fn new(router: Arc<ProviderRouter>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            router,
            tools,
            temperature: 0.3,
            max_tokens: None,
            backend_timeout: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Build an orchestrator with the `[llm]` and `[chat]` settings applied.
    pub fn from_config(router: Arc<ProviderRouter>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        let mut orchestrator = Self::new(router, tools)
            .with_temperature(config.llm.temperature)
            .with_max_tokens(config.llm.max_tokens)
            .with_backend_timeout(Duration::from_secs(config.llm.request_timeout_secs));
        if let Some(prompt) = &config.chat.system_prompt {
            orchestrator = orchestrator.with_system_prompt(prompt.clone());
        }
        orchestrator
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Bound each backend call. A call that exceeds it fails the run.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Run the tool-calling loop over `messages` until the backend answers,
    /// fails, or `max_turns` round-trips have been made.
    ///
    /// Never returns an error: every ending is a [`TerminalState`].
    pub async fn run(&self, messages: Vec<Message>, provider: ProviderKind, max_turns: u32) -> RunOutcome {
        let conversation = Conversation::from_messages(messages);
        let mut run = Run {
            id: Uuid::new_v4().simple().to_string(),
            initial_len: conversation.len(),
            conversation,
            turns_used: 0,
            max_turns,
            latest_content: None,
            usage: Usage::default(),
        };

        info!(
            run_id = %run.id,
            provider = %provider,
            messages = run.initial_len,
            max_turns,
            "Starting run"
        );

        let (backend, model) = match self.router.resolve(provider) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(run_id = %run.id, provider = %provider, error = %e, "Provider unavailable");
                return run.finish(TerminalState::failed(&e));
            }
        };

        let definitions = self.tools.list_definitions();
        let mut state = RunState::AwaitingBackend;

        loop {
            state = match state {
                RunState::AwaitingBackend => {
                    if run.turns_used >= run.max_turns {
                        RunState::BudgetExhausted
                    } else {
                        run.turns_used += 1;
                        let request = self.build_request(&run.conversation, &model, &definitions);
                        debug!(
                            run_id = %run.id,
                            turn = run.turns_used,
                            model = %model,
                            messages = request.messages.len(),
                            "Calling backend"
                        );
                        match self.call_backend(backend.as_ref(), request).await {
                            Ok(response) => RunState::Interpreting(response),
                            Err(e) => RunState::Failed(e),
                        }
                    }
                }

                RunState::Interpreting(response) => {
                    run.add_usage(response.usage);
                    let content = response.content.filter(|c| !c.trim().is_empty());

                    if response.tool_calls.is_empty() {
                        match content {
                            Some(answer) => {
                                run.conversation.push(Message::assistant(answer.clone()));
                                run.latest_content = Some(answer);
                                RunState::Done
                            }
                            None => RunState::Failed(ProviderError::EmptyResponse),
                        }
                    } else {
                        let calls = ensure_unique_ids(response.tool_calls);
                        debug!(
                            run_id = %run.id,
                            turn = run.turns_used,
                            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                            "Backend requested tools"
                        );
                        if let Some(text) = &content {
                            run.latest_content = Some(text.clone());
                        }
                        run.conversation.push(Message::assistant_tool_calls(
                            content.unwrap_or_default(),
                            calls.clone(),
                        ));
                        RunState::DispatchingTools(calls)
                    }
                }

                RunState::DispatchingTools(calls) => {
                    // In call order; one failure never skips its siblings
                    for call in &calls {
                        let result = self.tools.dispatch(call).await;
                        debug!(
                            run_id = %run.id,
                            tool = %call.name,
                            call_id = %call.id,
                            is_error = result.is_error,
                            "Tool dispatched"
                        );
                        run.conversation.push(Message::tool_result(
                            result.tool_call_id.clone(),
                            result.to_message_content(),
                        ));
                    }
                    RunState::AwaitingBackend
                }

                RunState::Done => return run.finish(TerminalState::Done),

                RunState::Failed(e) => {
                    warn!(run_id = %run.id, turn = run.turns_used, error = %e, "Run failed");
                    return run.finish(TerminalState::failed(&e));
                }

                RunState::BudgetExhausted => {
                    warn!(run_id = %run.id, max_turns = run.max_turns, "Turn budget exhausted");
                    return run.finish(TerminalState::BudgetExhausted);
                }
            };
        }
    }

    /// The request for the next turn. The default system prompt is sent,
    /// but never appended to the caller's conversation.
    fn build_request(&self, conversation: &Conversation, model: &str, tools: &[ToolDefinition]) -> ProviderRequest {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if !conversation.has_system_message() && !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(conversation.messages().iter().cloned());

        ProviderRequest {
            model: model.to_string(),
            messages,
            tools: tools.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    async fn call_backend(
        &self,
        backend: &dyn Provider,
        request: ProviderRequest,
    ) -> Result<NormalizedResponse, ProviderError> {
        match self.backend_timeout {
            Some(limit) => tokio::time::timeout(limit, backend.complete(request))
                .await
                .map_err(|_| {
                    ProviderError::Timeout(format!(
                        "{} gave no response within {}s",
                        backend.name(),
                        limit.as_secs()
                    ))
                })?,
            None => backend.complete(request).await,
        }
    }
}

/// Replace blank or repeated call ids so every tool result links to
/// exactly one call of its turn.
fn ensure_unique_ids(mut calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    for call in &mut calls {
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            call.id = ToolCallRequest::synthesize_id();
            seen.insert(call.id.clone());
        }
    }
    calls
}
