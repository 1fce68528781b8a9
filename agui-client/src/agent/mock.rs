//! Scripted transport for tests and examples.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use agui_event::{Event, RunAgentInput};

use crate::error::RunnerError;
use crate::stream::{events_stream, EventStream};

use super::AgentTransport;

/// One scripted run: its events, an optional terminal transport error, and
/// whether the stream should hang afterwards (for cancellation tests).
pub struct RunScript {
    pub events: Vec<Event>,
    pub error: Option<String>,
    pub hang: bool,
}

impl RunScript {
    pub fn events(events: Vec<Event>) -> Self {
        Self {
            events,
            error: None,
            hang: false,
        }
    }

    /// Emits the events, then fails the stream with a transport error.
    pub fn failing(events: Vec<Event>, error: impl Into<String>) -> Self {
        Self {
            events,
            error: Some(error.into()),
            hang: false,
        }
    }

    /// Emits the events, then never completes. The run only ends through
    /// cancellation.
    pub fn hanging(events: Vec<Event>) -> Self {
        Self {
            events,
            error: None,
            hang: true,
        }
    }
}

/// Transport that replays pre-recorded scripts, one per run, and records the
/// inputs it was called with.
pub struct MockAgentTransport {
    scripts: Mutex<VecDeque<RunScript>>,
    inputs: Mutex<Vec<RunAgentInput>>,
    max_version: Option<String>,
    connectable: bool,
}

impl MockAgentTransport {
    pub fn new(scripts: Vec<RunScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            inputs: Mutex::new(Vec::new()),
            max_version: None,
            connectable: false,
        }
    }

    /// A transport that serves exactly one run.
    pub fn single_run(events: Vec<Event>) -> Self {
        Self::new(vec![RunScript::events(events)])
    }

    /// Declares the highest protocol version the fake agent understands.
    pub fn with_max_version(mut self, version: impl Into<String>) -> Self {
        self.max_version = Some(version.into());
        self
    }

    /// Makes `connect` serve scripts like `run` does.
    pub fn with_connect(mut self) -> Self {
        self.connectable = true;
        self
    }

    /// Inputs received so far, in call order.
    pub fn recorded_inputs(&self) -> Vec<RunAgentInput> {
        self.inputs.lock().expect("inputs lock").clone()
    }

    fn next_stream(&self, input: RunAgentInput) -> Result<EventStream, RunnerError> {
        self.inputs.lock().expect("inputs lock").push(input);
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .ok_or_else(|| RunnerError::Transport("mock transport script exhausted".into()))?;

        let mut stream = events_stream(script.events);
        if let Some(message) = script.error {
            stream = stream
                .chain(futures::stream::once(async move {
                    Err(RunnerError::Transport(message))
                }))
                .boxed();
        }
        if script.hang {
            stream = stream.chain(futures::stream::pending()).boxed();
        }
        Ok(stream)
    }
}

#[async_trait]
impl AgentTransport for MockAgentTransport {
    async fn run(
        &self,
        input: RunAgentInput,
        _cancel: CancellationToken,
    ) -> Result<EventStream, RunnerError> {
        self.next_stream(input)
    }

    async fn connect(
        &self,
        input: RunAgentInput,
        _cancel: CancellationToken,
    ) -> Result<EventStream, RunnerError> {
        if !self.connectable {
            return Err(RunnerError::NotImplemented);
        }
        self.next_stream(input)
    }

    fn max_version(&self) -> Option<&str> {
        self.max_version.as_deref()
    }
}
