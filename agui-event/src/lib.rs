//! AG-UI wire protocol: type + payload events, messages, run input.
//!
//! This crate defines the wire shape of the Agent User Interaction protocol.
//! It does not depend on agui-client; the client folds `Event` values into
//! conversation state and drives subscribers from them.

pub mod event;
pub mod input;
pub mod message;
pub mod patch;

pub use event::{BaseEvent, Event, EventType};
pub use input::{Context, RunAgentInput, Tool};
pub use message::{
    AssistantMessage, ContentPart, FunctionCall, Message, MessageContent, Role, ToolCall,
    UserMessage,
};
pub use patch::JsonPatchOp;
