//! Conversation messages: role-tagged payloads with string or multi-part
//! content, streamed tool calls, and client-local activity messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message/author role, serialized lowercase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
    Tool,
    Activity,
}

/// Source of a binary content part: exactly one of an attachment id, a URL,
/// or inline base64 data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinarySource {
    Id { id: String },
    Url { url: String },
    Data { data: String },
}

/// Binary attachment part (user messages only).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryPart {
    pub mime_type: String,
    #[serde(flatten)]
    pub source: BinarySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One ordered part of a multi-part message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Binary(BinaryPart),
}

/// Message content: a plain string or an ordered part list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flattens to plain text: a string as-is, parts by concatenating the
    /// text parts (binary parts contribute nothing).
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Binary(_) => None,
                })
                .collect(),
        }
    }
}

/// A named function invocation with string-encoded JSON arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// An assistant-initiated tool call, streamed incrementally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub id: String,
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub base: MessageBase,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub id: String,
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(flatten)]
    pub base: MessageBase,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub id: String,
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub base: MessageBase,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperMessage {
    pub id: String,
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub base: MessageBase,
}

/// Resolves a previously opened assistant tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub id: String,
    pub content: String,
    pub tool_call_id: String,
    #[serde(flatten)]
    pub base: MessageBase,
}

/// Client-local structured message; content is manipulated exclusively via
/// activity snapshot/delta events and never sent back to the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMessage {
    pub id: String,
    pub activity_type: String,
    pub content: Value,
    #[serde(flatten)]
    pub base: MessageBase,
}

/// Optional display fields shared by all roles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One conversation message.
///
/// Each variant maps to a JSON object with `"role": "<role>"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Developer(DeveloperMessage),
    Tool(ToolResultMessage),
    Activity(ActivityMessage),
}

impl Message {
    /// Creates an empty streamed text message of the given role.
    ///
    /// Tool and activity roles cannot open a text stream; they fall back to
    /// assistant.
    pub fn empty_text(role: Role, id: impl Into<String>) -> Self {
        let id = id.into();
        let content = Some(MessageContent::Text(String::new()));
        match role {
            Role::User => Message::User(UserMessage {
                id,
                content,
                base: MessageBase::default(),
            }),
            Role::System => Message::System(SystemMessage {
                id,
                content,
                base: MessageBase::default(),
            }),
            Role::Developer => Message::Developer(DeveloperMessage {
                id,
                content,
                base: MessageBase::default(),
            }),
            Role::Assistant | Role::Tool | Role::Activity => {
                Message::Assistant(AssistantMessage {
                    id,
                    content,
                    tool_calls: Vec::new(),
                    base: MessageBase::default(),
                })
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User(m) => &m.id,
            Message::Assistant(m) => &m.id,
            Message::System(m) => &m.id,
            Message::Developer(m) => &m.id,
            Message::Tool(m) => &m.id,
            Message::Activity(m) => &m.id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::System(_) => Role::System,
            Message::Developer(_) => Role::Developer,
            Message::Tool(_) => Role::Tool,
            Message::Activity(_) => Role::Activity,
        }
    }

    /// Plain-text view of the content, when this role carries text content.
    pub fn content_text(&self) -> Option<String> {
        match self {
            Message::User(m) => m.content.as_ref().map(MessageContent::to_text),
            Message::Assistant(m) => m.content.as_ref().map(MessageContent::to_text),
            Message::System(m) => m.content.as_ref().map(MessageContent::to_text),
            Message::Developer(m) => m.content.as_ref().map(MessageContent::to_text),
            Message::Tool(m) => Some(m.content.clone()),
            Message::Activity(_) => None,
        }
    }

    /// Appends a streamed text delta to the content.
    ///
    /// Null content becomes the delta; string content grows; part-list
    /// content gains a trailing text part. Tool and activity messages are
    /// opaque to text streaming and ignore the delta.
    pub fn append_text_delta(&mut self, delta: &str) {
        let content = match self {
            Message::User(m) => &mut m.content,
            Message::Assistant(m) => &mut m.content,
            Message::System(m) => &mut m.content,
            Message::Developer(m) => &mut m.content,
            Message::Tool(_) | Message::Activity(_) => return,
        };
        match content {
            None => *content = Some(MessageContent::Text(delta.to_string())),
            Some(MessageContent::Text(s)) => s.push_str(delta),
            Some(MessageContent::Parts(parts)) => parts.push(ContentPart::Text {
                text: delta.to_string(),
            }),
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_assistant_mut(&mut self) -> Option<&mut AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_activity(&self) -> bool {
        matches!(self, Message::Activity(_))
    }
}

impl AssistantMessage {
    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|c| c.id == tool_call_id)
    }

    pub fn tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|c| c.id == tool_call_id)
    }
}
