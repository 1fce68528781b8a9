//! Subscribers: external observers that may also rewrite the proposed
//! mutation for each event.
//!
//! A subscriber is a bag of optional callbacks; every method has a no-op
//! default. Callbacks fall into three groups: lifecycle, per-event, and
//! derived-state. Event callbacks may return a [`SubscriberMutation`] to
//! replace the working messages/state before the built-in reducer runs, and
//! may stop propagation to later subscribers and the reducer.
//!
//! Subscribers always receive deep copies; mutations only travel through
//! explicit returns, never shared references.

use async_trait::async_trait;
use serde_json::Value;

use agui_event::event::{
    ActivityDeltaEvent, ActivitySnapshotEvent, CustomEvent, MessagesSnapshotEvent, RawEvent,
    RunErrorEvent, RunFinishedEvent, RunStartedEvent, StateDeltaEvent, StateSnapshotEvent,
    StepFinishedEvent, StepStartedEvent, TextMessageContentEvent, TextMessageEndEvent,
    TextMessageStartEvent, ThinkingEndEvent, ThinkingStartEvent, ThinkingTextMessageContentEvent,
    ThinkingTextMessageEndEvent, ThinkingTextMessageStartEvent, ToolCallArgsEvent,
    ToolCallEndEvent, ToolCallResultEvent, ToolCallStartEvent,
};
use agui_event::{Event, Message, RunAgentInput, ToolCall};

use crate::error::RunnerError;

/// Error from a subscriber callback. Logged and swallowed by the driver; the
/// next subscriber still runs.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a subscriber callback.
pub type SubscriberResult = Result<SubscriberMutation, SubscriberError>;

/// A subscriber's proposed change to the working view.
///
/// `None` fields leave the working view untouched. `stop_propagation` aborts
/// later subscribers and the built-in reducer for the current event; it has
/// no meaning on lifecycle callbacks other than `on_run_failed`, where it
/// downgrades the failure to a normal completion with an empty result.
#[derive(Clone, Debug, Default)]
pub struct SubscriberMutation {
    pub messages: Option<Vec<Message>>,
    pub state: Option<Value>,
    pub stop_propagation: bool,
}

impl SubscriberMutation {
    pub fn none() -> Self {
        Self::default()
    }

    /// Merges this mutation into the working view, returning which of
    /// (messages, state) changed.
    pub(crate) fn merge_into(self, messages: &mut Vec<Message>, state: &mut Value) -> (bool, bool) {
        let messages_changed = self.messages.is_some();
        let state_changed = self.state.is_some();
        if let Some(m) = self.messages {
            *messages = m;
        }
        if let Some(s) = self.state {
            *state = s;
        }
        (messages_changed, state_changed)
    }
}

/// Context handed to every subscriber callback: identity of the run plus
/// deep copies of the current working view.
#[derive(Clone, Debug)]
pub struct SubscriberParams {
    pub agent_id: String,
    pub messages: Vec<Message>,
    pub state: Value,
    pub input: RunAgentInput,
}

/// Streaming context for `on_tool_call_args_event`.
#[derive(Clone, Debug)]
pub struct ToolCallArgsSnapshot {
    /// Argument string of the tool call before this delta is appended.
    pub buffer: String,
    /// Best-effort parse of the possibly-truncated JSON including this
    /// delta. Advisory; the raw argument string is authoritative.
    pub partial_args: Option<Value>,
}

/// An observer registered against an agent for its lifetime or for one run.
///
/// Callback order per event: `on_event` across all subscribers, then the
/// kind-specific hook across all subscribers, then the built-in reducer
/// (unless propagation was stopped), then the derived-state hooks.
#[async_trait]
pub trait AgentSubscriber: Send + Sync {
    // --- Lifecycle ---

    async fn on_run_initialized(&self, _params: &SubscriberParams) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    /// Called when the run fails. Returning `stop_propagation: true` makes
    /// the run complete with an empty result instead of surfacing the error.
    async fn on_run_failed(
        &self,
        _error: &RunnerError,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    /// Always called once the run is over, whether it succeeded or failed.
    async fn on_run_finalized(&self, _params: &SubscriberParams) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    // --- Events ---

    async fn on_event(&self, _event: &Event, _params: &SubscriberParams) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_run_started_event(
        &self,
        _event: &RunStartedEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_run_finished_event(
        &self,
        _event: &RunFinishedEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_run_error_event(
        &self,
        _event: &RunErrorEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_step_started_event(
        &self,
        _event: &StepStartedEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_step_finished_event(
        &self,
        _event: &StepFinishedEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_text_message_start_event(
        &self,
        _event: &TextMessageStartEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    /// `text_message_buffer` is the message content before this delta is
    /// appended.
    async fn on_text_message_content_event(
        &self,
        _event: &TextMessageContentEvent,
        _text_message_buffer: &str,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_text_message_end_event(
        &self,
        _event: &TextMessageEndEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_tool_call_start_event(
        &self,
        _event: &ToolCallStartEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_tool_call_args_event(
        &self,
        _event: &ToolCallArgsEvent,
        _args: &ToolCallArgsSnapshot,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_tool_call_end_event(
        &self,
        _event: &ToolCallEndEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_tool_call_result_event(
        &self,
        _event: &ToolCallResultEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_state_snapshot_event(
        &self,
        _event: &StateSnapshotEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_state_delta_event(
        &self,
        _event: &StateDeltaEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_messages_snapshot_event(
        &self,
        _event: &MessagesSnapshotEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_activity_snapshot_event(
        &self,
        _event: &ActivitySnapshotEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_activity_delta_event(
        &self,
        _event: &ActivityDeltaEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_raw_event(
        &self,
        _event: &RawEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_custom_event(
        &self,
        _event: &CustomEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_thinking_start_event(
        &self,
        _event: &ThinkingStartEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_thinking_text_message_start_event(
        &self,
        _event: &ThinkingTextMessageStartEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_thinking_text_message_content_event(
        &self,
        _event: &ThinkingTextMessageContentEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_thinking_text_message_end_event(
        &self,
        _event: &ThinkingTextMessageEndEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    async fn on_thinking_end_event(
        &self,
        _event: &ThinkingEndEvent,
        _params: &SubscriberParams,
    ) -> SubscriberResult {
        Ok(SubscriberMutation::none())
    }

    // --- Derived state (fire-and-forget) ---

    async fn on_messages_changed(&self, _params: &SubscriberParams) {}

    async fn on_state_changed(&self, _params: &SubscriberParams) {}

    async fn on_new_message(&self, _message: &Message, _params: &SubscriberParams) {}

    async fn on_new_tool_call(&self, _tool_call: &ToolCall, _params: &SubscriberParams) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passive;

    #[async_trait]
    impl AgentSubscriber for Passive {}

    /// **Scenario**: every callback has a usable no-op default.
    #[tokio::test]
    async fn defaults_are_noop() {
        let sub = Passive;
        let params = SubscriberParams {
            agent_id: "a1".into(),
            messages: Vec::new(),
            state: Value::Null,
            input: RunAgentInput::new("t1", "r1"),
        };
        let out = sub.on_run_initialized(&params).await.unwrap();
        assert!(out.messages.is_none());
        assert!(out.state.is_none());
        assert!(!out.stop_propagation);
        sub.on_messages_changed(&params).await;
    }

    /// **Scenario**: merge_into reports exactly the fields that changed.
    #[test]
    fn merge_reports_changed_fields() {
        let mut messages = Vec::new();
        let mut state = Value::Null;

        let (m, s) = SubscriberMutation::none().merge_into(&mut messages, &mut state);
        assert!(!m && !s);

        let mutation = SubscriberMutation {
            messages: None,
            state: Some(serde_json::json!({"k": 1})),
            stop_propagation: false,
        };
        let (m, s) = mutation.merge_into(&mut messages, &mut state);
        assert!(!m && s);
        assert_eq!(state, serde_json::json!({"k": 1}));
    }
}
