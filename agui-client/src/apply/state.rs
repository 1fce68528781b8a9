//! Built-in reducers for state, raw/custom logs, and thinking telemetry.

use agui_event::event::{
    CustomEvent, RawEvent, StateDeltaEvent, StateSnapshotEvent, ThinkingStartEvent,
    ThinkingTextMessageContentEvent,
};

use crate::agent::conversation::{CustomEventRecord, RawEventRecord, ThinkingTrace};
use crate::patch::apply_patch;

use super::{BuiltinOutcome, EventApplier};

impl EventApplier {
    pub(super) fn handle_state_snapshot(
        &mut self,
        event: &StateSnapshotEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        self.state = event.snapshot.clone();
        outcome.state_changed = true;
    }

    /// Applies the patch atomically: on failure the state is untouched and
    /// the event is dropped.
    pub(super) fn handle_state_delta(
        &mut self,
        event: &StateDeltaEvent,
        outcome: &mut BuiltinOutcome,
    ) {
        match apply_patch(&self.state, &event.delta) {
            Ok(next) => {
                self.state = next;
                outcome.state_changed = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "STATE_DELTA patch failed; event dropped");
            }
        }
    }

    pub(super) fn handle_raw(&mut self, event: &RawEvent) {
        self.raw_events.push(RawEventRecord {
            event: event.event.clone(),
            source: event.source.clone(),
        });
    }

    pub(super) fn handle_custom(&mut self, event: &CustomEvent) {
        self.custom_events.push(CustomEventRecord {
            name: event.name.clone(),
            value: event.value.clone(),
        });
    }

    pub(super) fn handle_thinking_start(&mut self, event: &ThinkingStartEvent) {
        self.thinking = ThinkingTrace {
            is_thinking: true,
            title: event.title.clone(),
            messages: Vec::new(),
        };
        self.thinking_buffer = None;
    }

    pub(super) fn handle_thinking_text_start(&mut self) {
        self.thinking_buffer = Some(String::new());
    }

    pub(super) fn handle_thinking_text_content(
        &mut self,
        event: &ThinkingTextMessageContentEvent,
    ) {
        match &mut self.thinking_buffer {
            Some(buffer) => buffer.push_str(&event.delta),
            None => {
                tracing::warn!("THINKING_TEXT_MESSAGE_CONTENT without an open buffer; dropped");
            }
        }
    }

    pub(super) fn handle_thinking_text_end(&mut self) {
        match self.thinking_buffer.take() {
            Some(buffer) => self.thinking.messages.push(buffer),
            None => {
                tracing::warn!("THINKING_TEXT_MESSAGE_END without an open buffer; dropped");
            }
        }
    }

    /// Commits any open buffer and leaves the thinking phase.
    pub(super) fn handle_thinking_end(&mut self) {
        if let Some(buffer) = self.thinking_buffer.take() {
            self.thinking.messages.push(buffer);
        }
        self.thinking.is_thinking = false;
    }
}
