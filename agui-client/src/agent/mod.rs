//! Run orchestration: conversation identity, pipeline assembly, and the
//! public run/connect/abort surface.

pub mod conversation;
pub mod mock;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use agui_event::{Context, Message, RunAgentInput, Tool};

use crate::apply::EventApplier;
use crate::error::RunnerError;
use crate::middleware::{compose, CompatibilityMiddleware, Middleware, RunNext};
use crate::normalize::normalize;
use crate::stream::EventStream;
use crate::subscriber::AgentSubscriber;
use crate::verify::verify;

pub use conversation::{ConversationState, CustomEventRecord, RawEventRecord, ThinkingTrace};

/// Produces one run's event sequence given an input snapshot.
///
/// The concrete transport (HTTP/SSE, WebSocket, process-local) lives outside
/// this crate; it is expected to honor the cancellation token by ending the
/// stream at its next suspension point.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn run(
        &self,
        input: RunAgentInput,
        cancel: CancellationToken,
    ) -> Result<EventStream, RunnerError>;

    /// Persistent subscribe-style channel. Identical contract to `run`
    /// except the stream is not initiated anew per call.
    async fn connect(
        &self,
        _input: RunAgentInput,
        _cancel: CancellationToken,
    ) -> Result<EventStream, RunnerError> {
        Err(RunnerError::NotImplemented)
    }

    /// Highest protocol version this agent understands. `None` means
    /// current; old declarations get the compatibility middleware.
    fn max_version(&self) -> Option<&str> {
        None
    }
}

/// Initial identity and contents of an agent.
#[derive(Clone, Debug, Default)]
pub struct AgentConfig {
    pub agent_id: Option<String>,
    pub thread_id: Option<String>,
    pub initial_messages: Vec<Message>,
    pub initial_state: Value,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn with_thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    pub fn with_initial_messages(mut self, messages: Vec<Message>) -> Self {
        self.initial_messages = messages;
        self
    }

    pub fn with_initial_state(mut self, state: Value) -> Self {
        self.initial_state = state;
        self
    }
}

/// Per-run parameters for [`AgentClient::run_agent`].
#[derive(Clone, Default)]
pub struct RunAgentParams {
    pub run_id: Option<String>,
    pub tools: Vec<Tool>,
    pub context: Vec<Context>,
    pub forwarded_props: Value,
    /// Temporary subscriber for this run only, invoked after the permanent
    /// ones.
    pub subscriber: Option<Arc<dyn AgentSubscriber>>,
}

impl RunAgentParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_forwarded_props(mut self, props: Value) -> Self {
        self.forwarded_props = props;
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn AgentSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }
}

/// Outcome of a completed run.
#[derive(Clone, Debug, Default)]
pub struct RunAgentResult {
    /// Opaque result from the final RUN_FINISHED event.
    pub result: Option<Value>,
    /// Messages whose ids were not present before the run, in post-run
    /// order.
    pub new_messages: Vec<Message>,
}

/// Identifier of a permanent subscriber registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Cancels the run currently in flight on an agent, from anywhere.
#[derive(Clone)]
pub struct RunAbortHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl RunAbortHandle {
    /// Requests cooperative cancellation of the current run. Idempotent;
    /// before a run starts this is a no-op (each run arms a fresh token).
    pub fn abort(&self) {
        self.current.lock().expect("abort token lock").cancel();
    }
}

enum RunChannel {
    Run,
    Connect,
}

/// Client-side runtime for one agent: owns the conversation state for the
/// agent's lifetime, composes the middleware chain, runs the
/// normalize → verify → apply pipeline, and surfaces the final result.
///
/// Runs must be serialized by the caller; `is_running` is advisory only.
pub struct AgentClient {
    transport: Arc<dyn AgentTransport>,
    agent_id: Option<String>,
    thread_id: String,
    conversation: ConversationState,
    subscribers: Vec<(SubscriptionId, Arc<dyn AgentSubscriber>)>,
    next_subscription: u64,
    middlewares: Vec<Arc<dyn Middleware>>,
    running: Arc<AtomicBool>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl AgentClient {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self::with_config(transport, AgentConfig::default())
    }

    pub fn with_config(transport: Arc<dyn AgentTransport>, config: AgentConfig) -> Self {
        Self {
            transport,
            agent_id: config.agent_id,
            thread_id: config
                .thread_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            conversation: ConversationState {
                messages: config.initial_messages,
                state: config.initial_state,
                ..Default::default()
            },
            subscribers: Vec::new(),
            next_subscription: 0,
            middlewares: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Adds a middleware; registration order is wrapping order (first
    /// registered sees the input first).
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Registers a subscriber for the agent's lifetime.
    pub fn subscribe(&mut self, subscriber: Arc<dyn AgentSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    // --- Conversation accessors (defensive copies) ---

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages.clone()
    }

    pub fn state(&self) -> Value {
        self.conversation.state.clone()
    }

    pub fn thinking(&self) -> ThinkingTrace {
        self.conversation.thinking.clone()
    }

    pub fn raw_events(&self) -> Vec<RawEventRecord> {
        self.conversation.raw_events.clone()
    }

    pub fn custom_events(&self) -> Vec<CustomEventRecord> {
        self.conversation.custom_events.clone()
    }

    /// Explicitly resets the conversation messages.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.conversation.messages = messages;
    }

    /// Explicitly resets the agent-side program state.
    pub fn set_state(&mut self, state: Value) {
        self.conversation.state = state;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle for cancelling the in-flight run from another task.
    pub fn abort_handle(&self) -> RunAbortHandle {
        RunAbortHandle {
            current: Arc::clone(&self.cancel),
        }
    }

    /// Requests cooperative cancellation of the current run. Idempotent.
    pub fn abort_run(&self) {
        self.abort_handle().abort();
    }

    /// Executes one run against the transport's `run` channel.
    pub async fn run_agent(
        &mut self,
        params: RunAgentParams,
    ) -> Result<RunAgentResult, RunnerError> {
        self.run_pipeline(params, RunChannel::Run).await
    }

    /// Executes one run against the transport's persistent `connect`
    /// channel. Fails with [`RunnerError::NotImplemented`] when the agent
    /// has no such channel.
    pub async fn connect_agent(
        &mut self,
        params: RunAgentParams,
    ) -> Result<RunAgentResult, RunnerError> {
        self.run_pipeline(params, RunChannel::Connect).await
    }

    /// Fresh input snapshot for one run: deep copies of tools, context,
    /// forwarded props, state, and messages. Activity messages are UI-local
    /// artifacts and are never sent back to the agent.
    fn build_input(&self, run_id: String, params: &RunAgentParams) -> RunAgentInput {
        RunAgentInput {
            thread_id: self.thread_id.clone(),
            run_id,
            parent_run_id: None,
            tools: params.tools.clone(),
            context: params.context.clone(),
            forwarded_props: params.forwarded_props.clone(),
            state: self.conversation.state.clone(),
            messages: self
                .conversation
                .messages
                .iter()
                .filter(|m| !m.is_activity())
                .cloned()
                .collect(),
        }
    }

    fn middleware_chain(&self, channel: RunChannel, cancel: CancellationToken) -> RunNext {
        let transport = Arc::clone(&self.transport);
        let base = RunNext::new(move |input| {
            let transport = Arc::clone(&transport);
            let cancel = cancel.clone();
            let via_connect = matches!(channel, RunChannel::Connect);
            Box::pin(async move {
                if via_connect {
                    transport.connect(input, cancel).await
                } else {
                    transport.run(input, cancel).await
                }
            })
        });

        let mut middlewares = self.middlewares.clone();
        // The compatibility shim runs innermost so every caller-registered
        // middleware still sees the modern input shape.
        if let Some(version) = self.transport.max_version() {
            if CompatibilityMiddleware::applies_to(version) {
                middlewares.push(Arc::new(CompatibilityMiddleware));
            }
        }
        compose(&middlewares, base)
    }

    async fn run_pipeline(
        &mut self,
        params: RunAgentParams,
        channel: RunChannel,
    ) -> Result<RunAgentResult, RunnerError> {
        let agent_id = self
            .agent_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let run_id = params
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let input = self.build_input(run_id, &params);

        let mut subscribers: Vec<Arc<dyn AgentSubscriber>> = self
            .subscribers
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        if let Some(temporary) = &params.subscriber {
            subscribers.push(Arc::clone(temporary));
        }

        let pre_run_ids: HashSet<String> = self
            .conversation
            .messages
            .iter()
            .map(|m| m.id().to_string())
            .collect();

        // Arm a fresh token; an abort requested before this point was a
        // no-op by contract.
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("abort token lock") = cancel.clone();
        self.running.store(true, Ordering::SeqCst);

        let mut applier =
            EventApplier::new(agent_id.clone(), input.clone(), &self.conversation, subscribers);
        applier.run_initialized().await;

        let chain = self.middleware_chain(channel, cancel.clone());
        let outcome = match chain.run(input).await {
            Ok(stream) => {
                let mut stream = verify(normalize(stream));
                let mut failure = None;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = stream.next() => match next {
                            None => break,
                            Some(Ok(event)) => {
                                if let Err(err) = applier.apply_event(event).await {
                                    failure = Some(err);
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                failure = Some(err);
                                break;
                            }
                        },
                    }
                }
                match failure {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        applier.finalize_stream();

        let completed = match outcome {
            Ok(()) => {
                applier.run_finalized().await;
                true
            }
            Err(ref error) => {
                let stopped = applier.run_failed(error).await;
                applier.run_finalized().await;
                stopped
            }
        };

        // Partial updates persist on every path, including cancellation and
        // failure.
        applier.commit(&mut self.conversation);
        self.running.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                let new_messages = self
                    .conversation
                    .messages
                    .iter()
                    .filter(|m| !pre_run_ids.contains(m.id()))
                    .cloned()
                    .collect();
                Ok(RunAgentResult {
                    result: applier.result().cloned(),
                    new_messages,
                })
            }
            Err(_) if completed => Ok(RunAgentResult::default()),
            Err(error) => Err(error),
        }
    }
}
