//! Conversation state owned by an agent for its whole lifetime.

use serde_json::Value;

use agui_event::Message;

/// One accepted RAW event.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEventRecord {
    pub event: Value,
    pub source: Option<String>,
}

/// One accepted CUSTOM event.
#[derive(Clone, Debug, PartialEq)]
pub struct CustomEventRecord {
    pub name: String,
    pub value: Value,
}

/// Telemetry describing the agent's in-progress reasoning stream.
///
/// Not part of the conversation messages; reset at every run start.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThinkingTrace {
    pub is_thinking: bool,
    pub title: Option<String>,
    /// Finalized thinking messages, in stream order.
    pub messages: Vec<String>,
}

/// Everything an agent accumulates across runs on one thread.
///
/// Messages and state grow monotonically across runs unless the caller
/// explicitly resets them. A run derives its input snapshot from here and
/// writes its reductions back when the stream ends, including after
/// cancellation (partial updates persist).
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub state: Value,
    pub raw_events: Vec<RawEventRecord>,
    pub custom_events: Vec<CustomEventRecord>,
    pub thinking: ThinkingTrace,
}
