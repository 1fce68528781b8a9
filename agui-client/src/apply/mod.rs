//! The apply engine: folds verified events into conversation state and
//! drives subscriber callbacks with mutation semantics.
//!
//! Events are processed strictly one at a time. For each event the order is:
//! `on_event` across subscribers, the kind-specific hook across subscribers,
//! the built-in reducer (unless a subscriber stopped propagation), then the
//! derived-state hooks. Every subscriber sees deep copies; returned
//! mutations merge into the working view for the next subscriber.

mod messages;
mod state;

use std::sync::Arc;

use serde_json::Value;

use agui_event::{Event, Message, RunAgentInput, ToolCall};

use crate::agent::conversation::{
    ConversationState, CustomEventRecord, RawEventRecord, ThinkingTrace,
};
use crate::error::RunnerError;
use crate::subscriber::{
    AgentSubscriber, SubscriberMutation, SubscriberParams, SubscriberResult, ToolCallArgsSnapshot,
};
use crate::untruncate::parse_partial_json;

/// A (partial) change to the conversation produced by one event.
///
/// Contains exactly the fields that changed. The reducer emits one record per
/// event at most; callers that need every intermediate state must consume
/// every emission.
#[derive(Clone, Debug, Default)]
pub struct StateMutation {
    pub messages: Option<Vec<Message>>,
    pub state: Option<Value>,
}

/// What the built-in handler did for one event.
#[derive(Debug, Default)]
struct BuiltinOutcome {
    messages_changed: bool,
    state_changed: bool,
    /// Completed messages to announce via `on_new_message`.
    new_messages: Vec<Message>,
    /// Completed tool calls to announce via `on_new_tool_call`.
    new_tool_calls: Vec<ToolCall>,
}

/// Streaming context precomputed before the kind-specific hooks run.
enum HookContext {
    None,
    TextBuffer(String),
    ToolArgs(ToolCallArgsSnapshot),
}

/// Folds one run's events into a working copy of the conversation.
///
/// The orchestrator seeds it from the current [`ConversationState`], feeds it
/// the verified stream, and writes the result back when the stream ends, on
/// success, failure, and cancellation alike.
pub struct EventApplier {
    agent_id: String,
    input: RunAgentInput,
    subscribers: Vec<Arc<dyn AgentSubscriber>>,
    messages: Vec<Message>,
    state: Value,
    thinking: ThinkingTrace,
    /// Thinking message under construction, if any.
    thinking_buffer: Option<String>,
    raw_events: Vec<RawEventRecord>,
    custom_events: Vec<CustomEventRecord>,
    result: Option<Value>,
}

impl EventApplier {
    pub fn new(
        agent_id: impl Into<String>,
        input: RunAgentInput,
        conversation: &ConversationState,
        subscribers: Vec<Arc<dyn AgentSubscriber>>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            input,
            subscribers,
            messages: conversation.messages.clone(),
            state: conversation.state.clone(),
            thinking: conversation.thinking.clone(),
            thinking_buffer: None,
            raw_events: Vec::new(),
            custom_events: Vec::new(),
            result: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn thinking(&self) -> &ThinkingTrace {
        &self.thinking
    }

    /// Writes the working view back into the conversation. Called whenever
    /// the stream ends; partial updates from aborted runs persist.
    pub fn commit(&mut self, conversation: &mut ConversationState) {
        conversation.messages = self.messages.clone();
        conversation.state = self.state.clone();
        conversation.thinking = self.thinking.clone();
        conversation.raw_events.append(&mut self.raw_events);
        conversation.custom_events.append(&mut self.custom_events);
    }

    fn params(&self) -> SubscriberParams {
        SubscriberParams {
            agent_id: self.agent_id.clone(),
            messages: self.messages.clone(),
            state: self.state.clone(),
            input: self.input.clone(),
        }
    }

    /// Applies one verified event. Returns the mutation record when messages
    /// or state actually changed.
    pub async fn apply_event(
        &mut self,
        event: Event,
    ) -> Result<Option<StateMutation>, RunnerError> {
        if matches!(
            event,
            Event::TextMessageChunk(_) | Event::ToolCallChunk(_)
        ) {
            return Err(RunnerError::ProtocolViolation(
                "chunk event reached the reducer; the stream was not normalized".into(),
            ));
        }

        let mut messages_changed = false;
        let mut state_changed = false;

        // Generic hooks first.
        let mut stopped = self
            .drive_event_hooks(&event, &mut messages_changed, &mut state_changed)
            .await;

        // Kind-specific hooks, with streaming context computed against the
        // working view before the built-in handler appends anything.
        if !stopped {
            let ctx = self.hook_context(&event);
            stopped = self
                .drive_kind_hooks(&event, &ctx, &mut messages_changed, &mut state_changed)
                .await;
        }

        let mut outcome = BuiltinOutcome::default();
        if !stopped {
            self.apply_builtin(&event, &mut outcome)?;
        }
        messages_changed |= outcome.messages_changed;
        state_changed |= outcome.state_changed;

        self.drive_derived_hooks(&outcome, messages_changed, state_changed)
            .await;

        if !messages_changed && !state_changed {
            return Ok(None);
        }
        Ok(Some(StateMutation {
            messages: messages_changed.then(|| self.messages.clone()),
            state: state_changed.then(|| self.state.clone()),
        }))
    }

    /// Commits any in-flight thinking buffer once the stream has ended.
    pub fn finalize_stream(&mut self) {
        if let Some(buffer) = self.thinking_buffer.take() {
            self.thinking.messages.push(buffer);
        }
        self.thinking.is_thinking = false;
    }

    // --- Lifecycle drivers ---

    pub async fn run_initialized(&mut self) {
        for subscriber in self.subscribers.clone() {
            let params = self.params();
            match subscriber.on_run_initialized(&params).await {
                Ok(mutation) => {
                    mutation.merge_into(&mut self.messages, &mut self.state);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "subscriber on_run_initialized failed");
                }
            }
        }
    }

    /// Routes a fatal error through the subscribers. Returns true when any
    /// subscriber stopped propagation, downgrading the failure.
    pub async fn run_failed(&mut self, error: &RunnerError) -> bool {
        for subscriber in self.subscribers.clone() {
            let params = self.params();
            match subscriber.on_run_failed(error, &params).await {
                Ok(mutation) => {
                    let stop = mutation.stop_propagation;
                    mutation.merge_into(&mut self.messages, &mut self.state);
                    if stop {
                        return true;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "subscriber on_run_failed failed");
                }
            }
        }
        false
    }

    pub async fn run_finalized(&mut self) {
        for subscriber in self.subscribers.clone() {
            let params = self.params();
            match subscriber.on_run_finalized(&params).await {
                Ok(mutation) => {
                    mutation.merge_into(&mut self.messages, &mut self.state);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "subscriber on_run_finalized failed");
                }
            }
        }
    }

    // --- Subscriber chain drivers ---

    async fn drive_event_hooks(
        &mut self,
        event: &Event,
        messages_changed: &mut bool,
        state_changed: &mut bool,
    ) -> bool {
        for subscriber in self.subscribers.clone() {
            let params = self.params();
            match subscriber.on_event(event, &params).await {
                Ok(mutation) => {
                    let stop = mutation.stop_propagation;
                    let (m, s) = mutation.merge_into(&mut self.messages, &mut self.state);
                    *messages_changed |= m;
                    *state_changed |= s;
                    if stop {
                        return true;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "subscriber on_event failed");
                }
            }
        }
        false
    }

    async fn drive_kind_hooks(
        &mut self,
        event: &Event,
        ctx: &HookContext,
        messages_changed: &mut bool,
        state_changed: &mut bool,
    ) -> bool {
        for subscriber in self.subscribers.clone() {
            let params = self.params();
            match call_kind_hook(subscriber.as_ref(), event, ctx, &params).await {
                Ok(mutation) => {
                    let stop = mutation.stop_propagation;
                    let (m, s) = mutation.merge_into(&mut self.messages, &mut self.state);
                    *messages_changed |= m;
                    *state_changed |= s;
                    if stop {
                        return true;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "subscriber event hook failed");
                }
            }
        }
        false
    }

    async fn drive_derived_hooks(
        &self,
        outcome: &BuiltinOutcome,
        messages_changed: bool,
        state_changed: bool,
    ) {
        let params = self.params();
        for subscriber in &self.subscribers {
            if messages_changed {
                subscriber.on_messages_changed(&params).await;
            }
            if state_changed {
                subscriber.on_state_changed(&params).await;
            }
            for message in &outcome.new_messages {
                subscriber.on_new_message(message, &params).await;
            }
            for tool_call in &outcome.new_tool_calls {
                subscriber.on_new_tool_call(tool_call, &params).await;
            }
        }
    }

    /// Pre-append streaming context for content/args hooks.
    fn hook_context(&self, event: &Event) -> HookContext {
        match event {
            Event::TextMessageContent(e) => HookContext::TextBuffer(
                self.find_message(&e.message_id)
                    .and_then(Message::content_text)
                    .unwrap_or_default(),
            ),
            Event::ToolCallArgs(e) => {
                let buffer = self
                    .find_tool_call(&e.tool_call_id)
                    .map(|call| call.function.arguments.clone())
                    .unwrap_or_default();
                let partial_args = parse_partial_json(&format!("{buffer}{}", e.delta));
                HookContext::ToolArgs(ToolCallArgsSnapshot {
                    buffer,
                    partial_args,
                })
            }
            _ => HookContext::None,
        }
    }

    // --- Built-in reducer dispatch ---

    fn apply_builtin(
        &mut self,
        event: &Event,
        outcome: &mut BuiltinOutcome,
    ) -> Result<(), RunnerError> {
        match event {
            Event::RunStarted(e) => self.handle_run_started(e, outcome),
            Event::RunFinished(e) => {
                self.result = e.result.clone();
            }
            Event::RunError(e) => {
                return Err(RunnerError::RunFailed {
                    message: e.message.clone(),
                    code: e.code.clone(),
                });
            }
            // Subscriber hooks only.
            Event::StepStarted(_) | Event::StepFinished(_) => {}
            Event::TextMessageStart(e) => self.handle_text_start(e, outcome),
            Event::TextMessageContent(e) => self.handle_text_content(e, outcome),
            Event::TextMessageEnd(e) => self.handle_text_end(e, outcome),
            Event::ToolCallStart(e) => self.handle_tool_call_start(e, outcome),
            Event::ToolCallArgs(e) => self.handle_tool_call_args(e, outcome),
            Event::ToolCallEnd(e) => self.handle_tool_call_end(e, outcome),
            Event::ToolCallResult(e) => self.handle_tool_call_result(e, outcome),
            Event::StateSnapshot(e) => self.handle_state_snapshot(e, outcome),
            Event::StateDelta(e) => self.handle_state_delta(e, outcome),
            Event::MessagesSnapshot(e) => self.handle_messages_snapshot(e, outcome),
            Event::ActivitySnapshot(e) => self.handle_activity_snapshot(e, outcome),
            Event::ActivityDelta(e) => self.handle_activity_delta(e, outcome),
            Event::Raw(e) => self.handle_raw(e),
            Event::Custom(e) => self.handle_custom(e),
            Event::ThinkingStart(e) => self.handle_thinking_start(e),
            Event::ThinkingTextMessageStart(_) => self.handle_thinking_text_start(),
            Event::ThinkingTextMessageContent(e) => self.handle_thinking_text_content(e),
            Event::ThinkingTextMessageEnd(_) => self.handle_thinking_text_end(),
            Event::ThinkingEnd(_) => self.handle_thinking_end(),
            Event::TextMessageChunk(_) | Event::ToolCallChunk(_) => {
                unreachable!("rejected before dispatch")
            }
        }
        Ok(())
    }

    // --- Shared lookups ---

    fn find_message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id() == id)
    }

    fn find_message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id() == id)
    }

    fn find_tool_call(&self, tool_call_id: &str) -> Option<&ToolCall> {
        self.messages
            .iter()
            .rev()
            .filter_map(Message::as_assistant)
            .find_map(|m| m.tool_call(tool_call_id))
    }

    fn find_tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCall> {
        self.messages
            .iter_mut()
            .rev()
            .filter_map(Message::as_assistant_mut)
            .find_map(|m| m.tool_call_mut(tool_call_id))
    }
}

/// Calls the kind-specific subscriber hook matching the event.
async fn call_kind_hook(
    subscriber: &dyn AgentSubscriber,
    event: &Event,
    ctx: &HookContext,
    params: &SubscriberParams,
) -> SubscriberResult {
    match event {
        Event::RunStarted(e) => subscriber.on_run_started_event(e, params).await,
        Event::RunFinished(e) => subscriber.on_run_finished_event(e, params).await,
        Event::RunError(e) => subscriber.on_run_error_event(e, params).await,
        Event::StepStarted(e) => subscriber.on_step_started_event(e, params).await,
        Event::StepFinished(e) => subscriber.on_step_finished_event(e, params).await,
        Event::TextMessageStart(e) => subscriber.on_text_message_start_event(e, params).await,
        Event::TextMessageContent(e) => {
            let buffer = match ctx {
                HookContext::TextBuffer(buffer) => buffer.as_str(),
                _ => "",
            };
            subscriber
                .on_text_message_content_event(e, buffer, params)
                .await
        }
        Event::TextMessageEnd(e) => subscriber.on_text_message_end_event(e, params).await,
        Event::ToolCallStart(e) => subscriber.on_tool_call_start_event(e, params).await,
        Event::ToolCallArgs(e) => {
            let fallback;
            let snapshot = match ctx {
                HookContext::ToolArgs(snapshot) => snapshot,
                _ => {
                    fallback = ToolCallArgsSnapshot {
                        buffer: String::new(),
                        partial_args: None,
                    };
                    &fallback
                }
            };
            subscriber.on_tool_call_args_event(e, snapshot, params).await
        }
        Event::ToolCallEnd(e) => subscriber.on_tool_call_end_event(e, params).await,
        Event::ToolCallResult(e) => subscriber.on_tool_call_result_event(e, params).await,
        Event::StateSnapshot(e) => subscriber.on_state_snapshot_event(e, params).await,
        Event::StateDelta(e) => subscriber.on_state_delta_event(e, params).await,
        Event::MessagesSnapshot(e) => subscriber.on_messages_snapshot_event(e, params).await,
        Event::ActivitySnapshot(e) => subscriber.on_activity_snapshot_event(e, params).await,
        Event::ActivityDelta(e) => subscriber.on_activity_delta_event(e, params).await,
        Event::Raw(e) => subscriber.on_raw_event(e, params).await,
        Event::Custom(e) => subscriber.on_custom_event(e, params).await,
        Event::ThinkingStart(e) => subscriber.on_thinking_start_event(e, params).await,
        Event::ThinkingTextMessageStart(e) => {
            subscriber
                .on_thinking_text_message_start_event(e, params)
                .await
        }
        Event::ThinkingTextMessageContent(e) => {
            subscriber
                .on_thinking_text_message_content_event(e, params)
                .await
        }
        Event::ThinkingTextMessageEnd(e) => {
            subscriber.on_thinking_text_message_end_event(e, params).await
        }
        Event::ThinkingEnd(e) => subscriber.on_thinking_end_event(e, params).await,
        Event::TextMessageChunk(_) | Event::ToolCallChunk(_) => Ok(SubscriberMutation::none()),
    }
}
