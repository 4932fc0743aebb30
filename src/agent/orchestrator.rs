//! Tool-call-then-answer loop.
//!
//! One turn: the model is offered the search tools for up to
//! `max_tool_calls` rounds. A reply without tool calls is the answer. When
//! the rounds run out (or the model calls `terminate`) a last call without
//! tools produces the answer from what was gathered.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::client::{Completion, CompletionDelta, CompletionRequest, LlmProvider};
use crate::agent::loop_guard::LoopGuard;
use crate::agent::prompts::{system_prompt, PromptContext, EVALUATION_PROMPT, FINAL_ANSWER_PROMPT};
use crate::agent::session::{Session, SessionSettings, ToolMode};
use crate::agent::types::*;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::tools::ToolRegistry;

const EMPTY_ANSWER_FALLBACK: &str =
    "I could not produce an answer from the information gathered. Please try rephrasing the question.";

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

/// Per-turn settings, resolved from the request and the session defaults
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOptions {
    /// Forward content deltas as they arrive
    pub stream: bool,
    /// Tool rounds allowed
    pub max_tool_calls: u32,
    /// Tool offering policy
    pub tool_mode: ToolMode,
    /// System prompt override, used when the session is empty
    pub system_prompt: Option<String>,
    /// Sampling overrides
    pub options: GenerationOptions,
}

impl TurnOptions {
    /// Options taken from session defaults
    pub fn from_settings(settings: &SessionSettings) -> Self {
        TurnOptions {
            stream: settings.stream,
            max_tool_calls: settings.max_tool_calls,
            tool_mode: settings.tool_mode,
            system_prompt: settings.system_prompt.clone(),
            options: GenerationOptions {
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            },
        }
    }
}

/// How a turn finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFinish {
    /// The model answered on its own
    Completed,
    /// The tool-round limit was hit; the answer came from the final call
    ToolLimitReached,
    /// The model called `terminate`; the answer came from the final call
    Terminated,
}

/// Result of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// Answer text
    pub content: String,
    /// Tool rounds executed
    pub tool_calls_count: u32,
    /// Token usage over every call of the turn
    pub usage: Option<Usage>,
    /// How the turn finished
    pub finish: TurnFinish,
    /// Seconds spent on the turn
    pub response_time: f64,
}

/// Progress events of a turn, serialised as `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Session the turn runs in
    Session { session_id: String, created: bool },
    /// Answer text fragment
    Content { content: String },
    /// A tool call the model finished emitting
    ToolCall { id: String, name: String, arguments: String },
    /// A tool is about to run
    ToolExecuting { name: String, arguments: String },
    /// A tool succeeded; `result` is a preview
    ToolResult { name: String, result: String },
    /// A tool failed
    ToolError { name: String, error: String },
    /// The tool-round limit was hit
    MaxRoundsReached { rounds: u32 },
    /// The final tool-less call starts
    FinalAnswerStart,
    /// The turn finished
    Done {
        content: String,
        tool_calls_count: u32,
        response_time: f64,
        finish: TurnFinish,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// The turn failed
    Error { message: String, status_code: u16 },
}

impl AgentEvent {
    /// The `type` tag of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::Session { .. } => "session",
            AgentEvent::Content { .. } => "content",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolExecuting { .. } => "tool_executing",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::ToolError { .. } => "tool_error",
            AgentEvent::MaxRoundsReached { .. } => "max_rounds_reached",
            AgentEvent::FinalAnswerStart => "final_answer_start",
            AgentEvent::Done { .. } => "done",
            AgentEvent::Error { .. } => "error",
        }
    }

    /// Whether no event follows this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. } | AgentEvent::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Observer trait
// ---------------------------------------------------------------------------

/// Receives the events of a turn
#[async_trait]
pub trait TurnObserver: Send + Sync {
    /// Called for every event, in order
    async fn on_event(&self, _event: AgentEvent) {}
}

/// Observer that drops every event
pub struct NoopObserver;

#[async_trait]
impl TurnObserver for NoopObserver {}

#[async_trait]
impl TurnObserver for mpsc::Sender<AgentEvent> {
    async fn on_event(&self, event: AgentEvent) {
        // A closed channel means the client went away; the turn still
        // finishes so the session history stays consistent
        if self.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Core loop implementation
// ---------------------------------------------------------------------------

/// Runs turns against an LLM provider and a tool registry
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(llm: Arc<dyn LlmProvider>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Orchestrator { llm, tools, config }
    }

    /// Model answering the turns
    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Registered tools
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one turn on `session`
    ///
    /// On error the user message stays in the history so the caller can
    /// retry.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_message: &str,
        options: &TurnOptions,
        observer: &dyn TurnObserver,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();
        let max_rounds = options.max_tool_calls;

        if session.is_empty() {
            let prompt = system_prompt(
                options.system_prompt.as_deref(),
                self.config.system_prompt.as_deref(),
                &PromptContext::new(max_rounds),
            )?;
            session.push(Message::system(prompt));
        }
        session.push(Message::user(user_message));

        info!(
            session_id = %session.id,
            max_rounds,
            tool_mode = ?options.tool_mode,
            stream = options.stream,
            "Turn started"
        );

        let definitions = if options.tool_mode == ToolMode::Never {
            Vec::new()
        } else {
            self.tools.definitions()
        };

        let mut usage: Option<Usage> = None;
        let mut rounds: u32 = 0;
        let mut guard = LoopGuard::new(self.config.loop_guard_threshold);
        let mut finish = TurnFinish::ToolLimitReached;

        while rounds < max_rounds {
            debug!(session_id = %session.id, round = rounds + 1, "Calling LLM");

            let tool_choice = options.tool_mode.tool_choice(rounds);
            let request = CompletionRequest {
                messages: session.messages.clone(),
                tools: if tool_choice.is_some() { definitions.clone() } else { Vec::new() },
                tool_choice,
                options: options.options,
            };

            let completion = self.call(request, options.stream, observer).await?;
            accumulate(&mut usage, completion.usage.as_ref());

            if completion.wants_tools() {
                rounds += 1;
                info!(
                    session_id = %session.id,
                    round = rounds,
                    calls = completion.tool_calls.len(),
                    "Executing tool round"
                );

                let mut message = Message::assistant_tool_calls(completion.tool_calls.clone());
                message.content = completion.content.clone();
                session.push(message);

                if self
                    .execute_tools(session, &completion.tool_calls, &mut guard, observer)
                    .await
                {
                    finish = TurnFinish::Terminated;
                    break;
                }

                if rounds < max_rounds {
                    session.push(Message::system(EVALUATION_PROMPT));
                }
                continue;
            }

            match completion.content {
                Some(content) => {
                    info!(session_id = %session.id, rounds, "Model answered");
                    session.push(Message::assistant(content.clone()));
                    return Ok(self
                        .finish(session, content, rounds, usage, TurnFinish::Completed, started, observer)
                        .await);
                }
                None => {
                    warn!(session_id = %session.id, "Model returned neither content nor tool calls");
                    finish = TurnFinish::Completed;
                    break;
                }
            }
        }

        if finish == TurnFinish::ToolLimitReached {
            info!(session_id = %session.id, rounds, "Tool round limit reached, asking for the final answer");
            observer.on_event(AgentEvent::MaxRoundsReached { rounds }).await;
        }
        observer.on_event(AgentEvent::FinalAnswerStart).await;

        session.push(Message::system(FINAL_ANSWER_PROMPT));
        let request = CompletionRequest {
            messages: session.messages.clone(),
            tools: Vec::new(),
            tool_choice: None,
            options: options.options,
        };
        let completion = self.call(request, options.stream, observer).await?;
        accumulate(&mut usage, completion.usage.as_ref());

        let content = completion
            .content
            .unwrap_or_else(|| EMPTY_ANSWER_FALLBACK.to_string());
        session.push(Message::assistant(content.clone()));

        Ok(self
            .finish(session, content, rounds, usage, finish, started, observer)
            .await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        session: &mut Session,
        content: String,
        rounds: u32,
        usage: Option<Usage>,
        finish: TurnFinish,
        started: Instant,
        observer: &dyn TurnObserver,
    ) -> TurnOutcome {
        session.record_turn(rounds, usage.as_ref());

        let response_time = started.elapsed().as_secs_f64();
        info!(
            session_id = %session.id,
            rounds,
            finish = ?finish,
            tokens = usage.map_or(0, |u| u.total_tokens),
            response_time,
            "Turn finished"
        );

        observer
            .on_event(AgentEvent::Done {
                content: content.clone(),
                tool_calls_count: rounds,
                response_time,
                finish,
                usage,
            })
            .await;

        TurnOutcome {
            content,
            tool_calls_count: rounds,
            usage,
            finish,
            response_time,
        }
    }

    /// One LLM call; in streaming mode deltas are forwarded to the observer
    async fn call(
        &self,
        request: CompletionRequest,
        stream: bool,
        observer: &dyn TurnObserver,
    ) -> Result<Completion> {
        if !stream {
            return self.llm.complete(request).await;
        }

        let mut deltas = self.llm.complete_stream(request).await?;
        while let Some(delta) = deltas.next().await {
            match delta? {
                CompletionDelta::Content(content) => {
                    observer.on_event(AgentEvent::Content { content }).await;
                }
                CompletionDelta::ToolCall(call) => {
                    observer
                        .on_event(AgentEvent::ToolCall {
                            id: call.id,
                            name: call.function.name,
                            arguments: call.function.arguments,
                        })
                        .await;
                }
                CompletionDelta::Done(completion) => return Ok(completion),
            }
        }

        Err(Error::Llm("Completion stream ended without a result".to_string()))
    }

    /// Execute one round of tool calls; returns whether the search phase ends
    async fn execute_tools(
        &self,
        session: &mut Session,
        calls: &[AssistantToolCall],
        guard: &mut LoopGuard,
        observer: &dyn TurnObserver,
    ) -> bool {
        let mut ends_search = false;
        let mut hints = Vec::new();

        for call in calls {
            let name = call.function.name.clone();
            debug!(tool = %name, arguments = %call.function.arguments, "Tool call");
            observer
                .on_event(AgentEvent::ToolExecuting {
                    name: name.clone(),
                    arguments: call.function.arguments.clone(),
                })
                .await;

            let result = self.tools.execute(call).await;
            let text = result.to_message_text();

            if result.success {
                info!(tool = %name, chars = text.len(), "Tool succeeded");
                observer
                    .on_event(AgentEvent::ToolResult {
                        name: name.clone(),
                        result: result.preview(self.config.tool_result_preview_chars),
                    })
                    .await;
            } else {
                warn!(tool = %name, error = %text, "Tool failed");
                observer
                    .on_event(AgentEvent::ToolError {
                        name: name.clone(),
                        error: result.error.clone().unwrap_or_default(),
                    })
                    .await;
            }

            session.push(Message::tool(call.id.clone(), text.clone()));

            if let Some(hint) = guard.record(&name, &text) {
                warn!(tool = %name, "Loop guard triggered, injecting hint");
                hints.push(hint);
            }
            if self.tools.ends_search(&name) {
                ends_search = true;
            }
        }

        // Tool messages must directly follow the assistant message that
        // requested them
        for hint in hints {
            session.push(Message::system(hint));
        }

        ends_search
    }
}

fn accumulate(total: &mut Option<Usage>, usage: Option<&Usage>) {
    if let Some(usage) = usage {
        total.get_or_insert_with(Usage::default).accumulate(usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::client::CompletionStream;
    use crate::agent::types::Role;
    use crate::tools::{TerminateTool, Tool, ToolResult};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider replaying canned completions and recording requests
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<Completion>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Completion>>) -> Arc<Self> {
            Arc::new(ScriptedProvider {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn next(&self, request: CompletionRequest) -> Result<Completion> {
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Llm("script exhausted".to_string())))
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            self.next(request)
        }

        async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
            let completion = self.next(request)?;
            let mut deltas: Vec<Result<CompletionDelta>> = Vec::new();
            if let Some(ref content) = completion.content {
                for word in content.split_inclusive(' ') {
                    deltas.push(Ok(CompletionDelta::Content(word.to_string())));
                }
            }
            for call in &completion.tool_calls {
                deltas.push(Ok(CompletionDelta::ToolCall(call.clone())));
            }
            deltas.push(Ok(CompletionDelta::Done(completion)));
            Ok(Box::pin(futures::stream::iter(deltas)))
        }
    }

    struct FakeSearch;

    #[async_trait]
    impl Tool for FakeSearch {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "Fake search"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"query": {"type": "string"}}})
        }

        async fn execute(&self, args: Value) -> Result<ToolResult> {
            let query = args["query"].as_str().unwrap_or_default();
            Ok(ToolResult::success(format!("results for {}", query)))
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<AgentEvent>>);

    impl Collect {
        fn types(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().iter().map(AgentEvent::event_type).collect()
        }
    }

    #[async_trait]
    impl TurnObserver for Collect {
        async fn on_event(&self, event: AgentEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn answer(text: &str) -> Result<Completion> {
        Ok(Completion {
            content: Some(text.to_string()),
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 2, total_tokens: 12 }),
            ..Completion::default()
        })
    }

    fn search(query: &str) -> Result<Completion> {
        Ok(Completion {
            tool_calls: vec![AssistantToolCall::function(
                format!("call_{}", query),
                "web_search",
                json!({"query": query}).to_string(),
            )],
            ..Completion::default()
        })
    }

    fn tool_call(name: &str, args: &str) -> Result<Completion> {
        Ok(Completion {
            tool_calls: vec![AssistantToolCall::function("call_x", name, args)],
            ..Completion::default()
        })
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        let mut tools = ToolRegistry::new();
        tools.register(FakeSearch);
        tools.register(TerminateTool);
        Orchestrator::new(provider, tools, AgentConfig::default())
    }

    fn options(max_tool_calls: u32) -> TurnOptions {
        TurnOptions::from_settings(&SessionSettings::with_max_tool_calls(max_tool_calls))
    }

    fn session() -> Session {
        Session::new("s1", "user1", SessionSettings::with_max_tool_calls(5))
    }

    #[tokio::test]
    async fn direct_answer_needs_no_tools() {
        let provider = ScriptedProvider::new(vec![answer("Paris.")]);
        let mut session = session();

        let outcome = orchestrator(provider.clone())
            .run_turn(&mut session, "Capital of France?", &options(5), &NoopObserver)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Paris.");
        assert_eq!(outcome.tool_calls_count, 0);
        assert_eq!(outcome.finish, TurnFinish::Completed);
        assert_eq!(outcome.usage.unwrap().total_tokens, 12);

        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

        let request = &provider.requests()[0];
        assert_eq!(request.tool_choice, Some(ToolChoice::Auto));
        assert_eq!(request.tools.len(), 2);
    }

    #[tokio::test]
    async fn search_round_then_answer() {
        let provider = ScriptedProvider::new(vec![search("rust 1.85"), answer("It shipped in February.")]);
        let mut session = session();
        let events = Collect::default();

        let outcome = orchestrator(provider.clone())
            .run_turn(&mut session, "When did Rust 1.85 ship?", &options(3), &events)
            .await
            .unwrap();

        assert_eq!(outcome.tool_calls_count, 1);
        assert_eq!(outcome.finish, TurnFinish::Completed);
        assert_eq!(session.tool_calls_total, 1);

        let tool_msg = session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.text(), "results for rust 1.85");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_rust 1.85"));
        assert!(session.messages.iter().any(|m| m.text() == EVALUATION_PROMPT));

        assert_eq!(events.types(), vec!["tool_executing", "tool_result", "done"]);
        assert_eq!(provider.requests()[1].messages.len(), 5);
    }

    #[tokio::test]
    async fn limit_forces_final_answer_without_tools() {
        let provider = ScriptedProvider::new(vec![search("a"), search("b"), answer("Summary.")]);
        let mut session = session();
        let events = Collect::default();

        let outcome = orchestrator(provider.clone())
            .run_turn(&mut session, "question", &options(2), &events)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Summary.");
        assert_eq!(outcome.tool_calls_count, 2);
        assert_eq!(outcome.finish, TurnFinish::ToolLimitReached);

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].tools.is_empty());
        assert!(requests[2].tool_choice.is_none());
        assert_eq!(requests[2].messages.last().unwrap().text(), FINAL_ANSWER_PROMPT);

        // evaluation prompt only between rounds, not after the last one
        let evaluations = session.messages.iter().filter(|m| m.text() == EVALUATION_PROMPT).count();
        assert_eq!(evaluations, 1);

        let types = events.types();
        assert!(types.contains(&"max_rounds_reached"));
        assert_eq!(&types[types.len() - 2..], &["final_answer_start", "done"]);
        assert!(events
            .0
            .lock()
            .unwrap()
            .contains(&AgentEvent::MaxRoundsReached { rounds: 2 }));
    }

    #[tokio::test]
    async fn terminate_ends_search_early() {
        let provider = ScriptedProvider::new(vec![tool_call("terminate", r#"{"reason":"done"}"#), answer("Final.")]);
        let mut session = session();
        let events = Collect::default();

        let outcome = orchestrator(provider)
            .run_turn(&mut session, "question", &options(5), &events)
            .await
            .unwrap();

        assert_eq!(outcome.finish, TurnFinish::Terminated);
        assert_eq!(outcome.tool_calls_count, 1);
        assert!(!events.types().contains(&"max_rounds_reached"));
    }

    #[tokio::test]
    async fn tool_failures_do_not_abort_the_turn() {
        let provider = ScriptedProvider::new(vec![tool_call("nonexistent", "{}"), answer("Sorry.")]);
        let mut session = session();
        let events = Collect::default();

        let outcome = orchestrator(provider)
            .run_turn(&mut session, "question", &options(3), &events)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Sorry.");
        assert!(events.types().contains(&"tool_error"));
        let tool_msg = session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.text().starts_with("Error: Unknown tool"));
    }

    #[tokio::test]
    async fn tool_modes_shape_requests() {
        let provider = ScriptedProvider::new(vec![search("x"), answer("A.")]);
        let mut opts = options(3);
        opts.tool_mode = ToolMode::Always;
        orchestrator(provider.clone())
            .run_turn(&mut session(), "q", &opts, &NoopObserver)
            .await
            .unwrap();
        let requests = provider.requests();
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Required));
        assert_eq!(requests[1].tool_choice, Some(ToolChoice::Auto));

        let provider = ScriptedProvider::new(vec![answer("B.")]);
        opts.tool_mode = ToolMode::Never;
        orchestrator(provider.clone())
            .run_turn(&mut session(), "q", &opts, &NoopObserver)
            .await
            .unwrap();
        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert!(request.tool_choice.is_none());
    }

    #[tokio::test]
    async fn streaming_forwards_content_and_tool_calls() {
        let provider = ScriptedProvider::new(vec![search("q"), answer("Streamed answer here")]);
        let mut opts = options(3);
        opts.stream = true;
        let events = Collect::default();

        let outcome = orchestrator(provider)
            .run_turn(&mut session(), "q", &opts, &events)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Streamed answer here");
        let collected = events.0.lock().unwrap().clone();
        let streamed: String = collected
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Content { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, "Streamed answer here");
        assert_eq!(collected[0].event_type(), "tool_call");
        assert!(collected.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn llm_failure_keeps_the_user_message() {
        let provider = ScriptedProvider::new(vec![Err(Error::LlmUpstream {
            status: 503,
            message: "down".to_string(),
        })]);
        let mut session = session();

        let err = orchestrator(provider)
            .run_turn(&mut session, "hello?", &options(3), &NoopObserver)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LlmUpstream { .. }));
        assert_eq!(session.messages.last().unwrap().text(), "hello?");
        assert_eq!(session.message_count, 1);
    }

    #[tokio::test]
    async fn caller_system_prompt_is_added_once_verbatim() {
        let provider = ScriptedProvider::new(vec![answer("one"), answer("two")]);
        let orchestrator = orchestrator(provider);
        let mut session = session();
        let mut opts = options(3);
        opts.system_prompt = Some("Custom prompt, {{max_tool_calls}} searches.".to_string());

        orchestrator.run_turn(&mut session, "first", &opts, &NoopObserver).await.unwrap();
        orchestrator.run_turn(&mut session, "second", &opts, &NoopObserver).await.unwrap();

        let systems: Vec<&Message> = session.messages.iter().filter(|m| m.role == Role::System).collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].text(), "Custom prompt, {{max_tool_calls}} searches.");
        assert_eq!(session.message_count, 2);
    }

    #[tokio::test]
    async fn empty_reply_falls_back_to_final_call() {
        let provider = ScriptedProvider::new(vec![Ok(Completion::default()), answer("Recovered.")]);
        let events = Collect::default();

        let outcome = orchestrator(provider)
            .run_turn(&mut session(), "q", &options(3), &events)
            .await
            .unwrap();

        assert_eq!(outcome.content, "Recovered.");
        assert_eq!(outcome.finish, TurnFinish::Completed);
        assert!(!events.types().contains(&"max_rounds_reached"));
    }

    #[test]
    fn events_serialise_with_type_and_data() {
        let event = AgentEvent::ToolResult {
            name: "web_search".to_string(),
            result: "ok".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "tool_result", "data": {"name": "web_search", "result": "ok"}})
        );
        assert_eq!(
            serde_json::to_value(AgentEvent::FinalAnswerStart).unwrap(),
            json!({"type": "final_answer_start"})
        );
    }
}
