//! Run input snapshot: the initial conditions handed to an agent for one run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// A tool the client makes available to the agent for this run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool parameters.
    pub parameters: Value,
}

/// One item of caller-provided context forwarded to the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub description: String,
    pub value: String,
}

/// Snapshot passed to the agent for a single run.
///
/// Derived from the current conversation state; the reducer treats it as the
/// run's initial conditions. Activity messages never appear here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    pub thread_id: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub context: Vec<Context>,
    #[serde(default)]
    pub forwarded_props: Value,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl RunAgentInput {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            parent_run_id: None,
            tools: Vec::new(),
            context: Vec::new(),
            forwarded_props: Value::Null,
            state: Value::Null,
            messages: Vec::new(),
        }
    }
}
