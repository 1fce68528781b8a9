//! Protocol well-formedness checking.
//!
//! A finite-state machine over the normalized stream. The verifier is pure
//! over its input: it inspects events, never rewrites them, and carries no
//! side effects. Downstream reducers only ever see sequences that passed.

use std::collections::HashSet;

use async_stream::try_stream;
use futures::StreamExt;

use agui_event::{Event, EventType};

use crate::error::RunnerError;
use crate::stream::EventStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunPhase {
    /// Before RUN_STARTED.
    Idle,
    /// Between RUN_STARTED and a terminal event.
    Running,
    /// After RUN_FINISHED or RUN_ERROR.
    Terminal,
}

/// Enforces the event-kind state machine for a single run.
pub struct EventVerifier {
    phase: RunPhase,
    /// Message ids with an open text stream. Independent sub-machines:
    /// several messages may stream concurrently.
    open_text: HashSet<String>,
    /// Tool call ids with an open argument stream.
    open_tool_calls: HashSet<String>,
    /// LIFO stack of open step names.
    steps: Vec<String>,
    thinking: bool,
    thinking_text_open: bool,
}

impl EventVerifier {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            open_text: HashSet::new(),
            open_tool_calls: HashSet::new(),
            steps: Vec::new(),
            thinking: false,
            thinking_text_open: false,
        }
    }

    /// Checks one event against the machine and advances it.
    pub fn check(&mut self, event: &Event) -> Result<(), RunnerError> {
        let kind = event.event_type();

        if matches!(
            kind,
            EventType::TextMessageChunk | EventType::ToolCallChunk
        ) {
            return Err(violation(format!(
                "{kind:?} must be normalized before verification"
            )));
        }

        match event {
            Event::RunStarted(_) => {
                return match self.phase {
                    RunPhase::Idle => {
                        self.phase = RunPhase::Running;
                        Ok(())
                    }
                    RunPhase::Running => {
                        Err(violation("RUN_STARTED sent while a run is in progress"))
                    }
                    RunPhase::Terminal => {
                        Err(violation("RUN_STARTED sent after the run terminated"))
                    }
                };
            }
            // Transports may report failure before the run opens.
            Event::RunError(_) => {
                return match self.phase {
                    RunPhase::Terminal => {
                        Err(violation("RUN_ERROR sent after the run terminated"))
                    }
                    _ => {
                        self.phase = RunPhase::Terminal;
                        Ok(())
                    }
                };
            }
            _ => {}
        }

        match self.phase {
            RunPhase::Idle => {
                return Err(violation(format!(
                    "first event must be RUN_STARTED, got {kind:?}"
                )));
            }
            RunPhase::Terminal => {
                return Err(violation(format!(
                    "{kind:?} sent after the run terminated"
                )));
            }
            RunPhase::Running => {}
        }

        match event {
            Event::RunFinished(_) => {
                self.phase = RunPhase::Terminal;
                Ok(())
            }
            Event::TextMessageStart(e) => {
                if !self.open_text.insert(e.message_id.clone()) {
                    return Err(violation(format!(
                        "TEXT_MESSAGE_START for message '{}' which is already streaming",
                        e.message_id
                    )));
                }
                Ok(())
            }
            Event::TextMessageContent(e) => {
                if !self.open_text.contains(&e.message_id) {
                    return Err(violation(format!(
                        "TEXT_MESSAGE_CONTENT for message '{}' without a start",
                        e.message_id
                    )));
                }
                Ok(())
            }
            Event::TextMessageEnd(e) => {
                if !self.open_text.remove(&e.message_id) {
                    return Err(violation(format!(
                        "TEXT_MESSAGE_END for message '{}' without a start",
                        e.message_id
                    )));
                }
                Ok(())
            }
            Event::ToolCallStart(e) => {
                if !self.open_tool_calls.insert(e.tool_call_id.clone()) {
                    return Err(violation(format!(
                        "TOOL_CALL_START for call '{}' which is already streaming",
                        e.tool_call_id
                    )));
                }
                Ok(())
            }
            Event::ToolCallArgs(e) => {
                if !self.open_tool_calls.contains(&e.tool_call_id) {
                    return Err(violation(format!(
                        "TOOL_CALL_ARGS for call '{}' without a start",
                        e.tool_call_id
                    )));
                }
                Ok(())
            }
            Event::ToolCallEnd(e) => {
                if !self.open_tool_calls.remove(&e.tool_call_id) {
                    return Err(violation(format!(
                        "TOOL_CALL_END for call '{}' without a start",
                        e.tool_call_id
                    )));
                }
                Ok(())
            }
            Event::StepStarted(e) => {
                self.steps.push(e.step_name.clone());
                Ok(())
            }
            Event::StepFinished(e) => match self.steps.last() {
                Some(top) if *top == e.step_name => {
                    self.steps.pop();
                    Ok(())
                }
                Some(top) => Err(violation(format!(
                    "STEP_FINISHED for '{}' but innermost open step is '{top}'",
                    e.step_name
                ))),
                None => Err(violation(format!(
                    "STEP_FINISHED for '{}' with no open step",
                    e.step_name
                ))),
            },
            Event::ThinkingStart(_) => {
                if self.thinking {
                    return Err(violation("THINKING_START while already thinking"));
                }
                self.thinking = true;
                self.thinking_text_open = false;
                Ok(())
            }
            Event::ThinkingEnd(_) => {
                if !self.thinking {
                    return Err(violation("THINKING_END without THINKING_START"));
                }
                // An open thinking buffer is legal here; the reducer commits it.
                self.thinking = false;
                self.thinking_text_open = false;
                Ok(())
            }
            Event::ThinkingTextMessageStart(_) => {
                if !self.thinking {
                    return Err(violation(
                        "THINKING_TEXT_MESSAGE_START outside a thinking phase",
                    ));
                }
                if self.thinking_text_open {
                    return Err(violation(
                        "THINKING_TEXT_MESSAGE_START while a thinking message is open",
                    ));
                }
                self.thinking_text_open = true;
                Ok(())
            }
            Event::ThinkingTextMessageContent(_) => {
                if !self.thinking_text_open {
                    return Err(violation(
                        "THINKING_TEXT_MESSAGE_CONTENT without a start",
                    ));
                }
                Ok(())
            }
            Event::ThinkingTextMessageEnd(_) => {
                if !self.thinking_text_open {
                    return Err(violation("THINKING_TEXT_MESSAGE_END without a start"));
                }
                self.thinking_text_open = false;
                Ok(())
            }
            // Accepted in RUNNING without further structural constraint.
            Event::StateSnapshot(_)
            | Event::StateDelta(_)
            | Event::MessagesSnapshot(_)
            | Event::ActivitySnapshot(_)
            | Event::ActivityDelta(_)
            | Event::ToolCallResult(_)
            | Event::Raw(_)
            | Event::Custom(_) => Ok(()),
            Event::RunStarted(_)
            | Event::RunError(_)
            | Event::TextMessageChunk(_)
            | Event::ToolCallChunk(_) => unreachable!("handled above"),
        }
    }
}

impl Default for EventVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn violation(message: impl Into<String>) -> RunnerError {
    RunnerError::ProtocolViolation(message.into())
}

/// Stream stage: verifies each event before passing it on; the first
/// violation terminates the stream with an error.
pub fn verify(mut upstream: EventStream) -> EventStream {
    Box::pin(try_stream! {
        let mut verifier = EventVerifier::new();
        while let Some(event) = upstream.next().await {
            let event = event?;
            verifier.check(&event)?;
            yield event;
        }
    })
}
