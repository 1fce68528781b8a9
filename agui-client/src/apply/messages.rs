//! Built-in reducers for message-bearing events: text streaming, tool calls,
//! tool results, snapshots, and activity messages.
//!
//! Unknown message or tool-call ids are logged and the event dropped; the
//! run continues.

use agui_event::event::{
    ActivityDeltaEvent, ActivitySnapshotEvent, MessagesSnapshotEvent, RunStartedEvent,
    TextMessageContentEvent, TextMessageEndEvent, TextMessageStartEvent, ToolCallArgsEvent,
    ToolCallEndEvent, ToolCallResultEvent, ToolCallStartEvent,
};
use agui_event::message::{
    ActivityMessage, AssistantMessage, FunctionCall, MessageBase, ToolResultMessage,
};
use agui_event::{Message, Role, ToolCall};

use crate::agent::conversation::ThinkingTrace;
use crate::patch::apply_patch;

use super::{BuiltinOutcome, EventApplier};

impl EventApplier {
    pub(super) fn handle_run_started(
        &mut self,
        event: &RunStartedEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        self.thinking = ThinkingTrace::default();
        self.thinking_buffer = None;

        let Some(input) = &event.input else { return };
        for message in &input.messages {
            if self.messages.iter().any(|m| m.id() == message.id()) {
                continue;
            }
            self.messages.push(message.clone());
            outcome.messages_changed = true;
        }
    }

    pub(super) fn handle_text_start(
        &mut self,
        event: &TextMessageStartEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        let role = event.role.unwrap_or(Role::Assistant);
        self.messages
            .push(Message::empty_text(role, &event.message_id));
        outcome.messages_changed = true;
    }

    pub(super) fn handle_text_content(
        &mut self,
        event: &TextMessageContentEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        match self.find_message_mut(&event.message_id) {
            Some(message) => {
                message.append_text_delta(&event.delta);
                outcome.messages_changed = true;
            }
            None => {
                tracing::warn!(
                    message_id = %event.message_id,
                    "TEXT_MESSAGE_CONTENT for unknown message; event dropped"
                );
            }
        }
    }

    pub(super) fn handle_text_end(
        &mut self,
        event: &TextMessageEndEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        match self.find_message(&event.message_id) {
            Some(message) => outcome.new_messages.push(message.clone()),
            None => {
                tracing::warn!(
                    message_id = %event.message_id,
                    "TEXT_MESSAGE_END for unknown message"
                );
            }
        }
    }

    pub(super) fn handle_tool_call_start(
        &mut self,
        event: &ToolCallStartEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        let tool_call = ToolCall {
            id: event.tool_call_id.clone(),
            function: FunctionCall {
                name: event.tool_call_name.clone(),
                arguments: String::new(),
            },
        };

        // Anchor to the named assistant message, or the last assistant
        // message when no parent is given.
        let target = match &event.parent_message_id {
            Some(parent_id) => self
                .messages
                .iter_mut()
                .rev()
                .filter_map(Message::as_assistant_mut)
                .find(|m| m.id == *parent_id),
            None => self
                .messages
                .iter_mut()
                .rev()
                .filter_map(Message::as_assistant_mut)
                .next(),
        };

        match target {
            Some(message) => message.tool_calls.push(tool_call),
            None => {
                let id = event
                    .parent_message_id
                    .clone()
                    .unwrap_or_else(|| event.tool_call_id.clone());
                self.messages.push(Message::Assistant(AssistantMessage {
                    id,
                    content: None,
                    tool_calls: vec![tool_call],
                    base: MessageBase::default(),
                }));
            }
        }
        outcome.messages_changed = true;
    }

    pub(super) fn handle_tool_call_args(
        &mut self,
        event: &ToolCallArgsEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        match self.find_tool_call_mut(&event.tool_call_id) {
            Some(call) => {
                call.function.arguments.push_str(&event.delta);
                outcome.messages_changed = true;
            }
            None => {
                tracing::warn!(
                    tool_call_id = %event.tool_call_id,
                    "TOOL_CALL_ARGS for unknown tool call; event dropped"
                );
            }
        }
    }

    pub(super) fn handle_tool_call_end(
        &mut self,
        event: &ToolCallEndEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        match self.find_tool_call(&event.tool_call_id) {
            Some(call) => outcome.new_tool_calls.push(call.clone()),
            None => {
                tracing::warn!(
                    tool_call_id = %event.tool_call_id,
                    "TOOL_CALL_END for unknown tool call"
                );
            }
        }
    }

    pub(super) fn handle_tool_call_result(
        &mut self,
        event: &ToolCallResultEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        let message = Message::Tool(ToolResultMessage {
            id: event.message_id.clone(),
            content: event.content.clone(),
            tool_call_id: event.tool_call_id.clone(),
            base: MessageBase::default(),
        });
        outcome.new_messages.push(message.clone());
        self.messages.push(message);
        outcome.messages_changed = true;
    }

    pub(super) fn handle_messages_snapshot(
        &mut self,
        event: &MessagesSnapshotEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        self.messages = event.messages.clone();
        outcome.messages_changed = true;
    }

    pub(super) fn handle_activity_snapshot(
        &mut self,
        event: &ActivitySnapshotEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        let position = self
            .messages
            .iter()
            .position(|m| m.id() == event.message_id);
        match position {
            None => {
                let message = Message::Activity(ActivityMessage {
                    id: event.message_id.clone(),
                    activity_type: event.activity_type.clone(),
                    content: event.content.clone(),
                    base: MessageBase::default(),
                });
                outcome.new_messages.push(message.clone());
                self.messages.push(message);
                outcome.messages_changed = true;
            }
            Some(index) if event.replace.unwrap_or(true) => {
                match &mut self.messages[index] {
                    Message::Activity(activity) => {
                        activity.activity_type = event.activity_type.clone();
                        activity.content = event.content.clone();
                    }
                    other => {
                        *other = Message::Activity(ActivityMessage {
                            id: event.message_id.clone(),
                            activity_type: event.activity_type.clone(),
                            content: event.content.clone(),
                            base: MessageBase::default(),
                        });
                    }
                }
                outcome.messages_changed = true;
            }
            // replace=false leaves the existing message untouched.
            Some(_) => {}
        }
    }

    pub(super) fn handle_activity_delta(
        &mut self,
        event: &ActivityDeltaEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        let Some(message) = self.find_message_mut(&event.message_id) else {
            tracing::warn!(
                message_id = %event.message_id,
                "ACTIVITY_DELTA for unknown message; event dropped"
            );
            return;
        };
        let Message::Activity(activity) = message else {
            tracing::warn!(
                message_id = %event.message_id,
                "ACTIVITY_DELTA target is not an activity message; event dropped"
            );
            return;
        };
        match apply_patch(&activity.content, &event.patch) {
            Ok(patched) => {
                activity.content = patched;
                outcome.messages_changed = true;
            }
            Err(err) => {
                tracing::warn!(
                    message_id = %event.message_id,
                    error = %err,
                    "ACTIVITY_DELTA patch failed; event dropped"
                );
            }
        }
    }
}
