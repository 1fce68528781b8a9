//! Integration tests: the full normalize → verify → apply pipeline as driven
//! by the orchestrator, from chunked wire events down to conversation state.

mod init_logging;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use agui_client::subscriber::SubscriberParams;
use agui_client::{
    AgentClient, AgentConfig, AgentSubscriber, MockAgentTransport, RunAgentParams, RunnerError,
};
use agui_event::event::{
    BaseEvent, RunErrorEvent, RunFinishedEvent, RunStartedEvent, StateDeltaEvent,
    TextMessageChunkEvent, TextMessageContentEvent, TextMessageStartEvent, ToolCallArgsEvent,
    ToolCallChunkEvent, ToolCallEndEvent, ToolCallStartEvent,
};
use agui_event::message::{MessageBase, UserMessage};
use agui_event::{ContentPart, Event, Message, MessageContent, Role, ToolCall};

fn run_started() -> Event {
    Event::RunStarted(RunStartedEvent {
        thread_id: "t1".into(),
        run_id: "r1".into(),
        input: None,
        base: BaseEvent::default(),
    })
}

fn run_finished() -> Event {
    Event::RunFinished(RunFinishedEvent {
        thread_id: "t1".into(),
        run_id: "r1".into(),
        result: None,
        base: BaseEvent::default(),
    })
}

fn text_chunk(id: Option<&str>, delta: &str) -> Event {
    Event::TextMessageChunk(TextMessageChunkEvent {
        message_id: id.map(String::from),
        role: None,
        delta: Some(delta.into()),
        base: BaseEvent::default(),
    })
}

/// **Scenario**: chunked text events stream through the whole pipeline and
/// land as one assistant message.
#[tokio::test]
async fn chunked_text_flows_through_pipeline() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        text_chunk(Some("m1"), "Hello, "),
        text_chunk(None, "world"),
        run_finished(),
    ]));
    let mut client = AgentClient::new(transport);
    let result = client.run_agent(RunAgentParams::new()).await.unwrap();

    assert_eq!(result.new_messages.len(), 1);
    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role(), Role::Assistant);
    assert_eq!(messages[0].content_text().as_deref(), Some("Hello, world"));
}

/// **Scenario**: a streamed tool call with split args produces one assistant
/// message holding the concatenated arguments; on_new_tool_call fires once.
#[tokio::test]
async fn streaming_tool_call_end_to_end() {
    #[derive(Default)]
    struct Counting {
        tool_calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentSubscriber for Counting {
        async fn on_new_tool_call(&self, tool_call: &ToolCall, _params: &SubscriberParams) {
            assert_eq!(tool_call.function.name, "search");
            self.tool_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        Event::ToolCallStart(ToolCallStartEvent {
            tool_call_id: "tool1".into(),
            tool_call_name: "search".into(),
            parent_message_id: Some("msg1".into()),
            base: BaseEvent::default(),
        }),
        Event::ToolCallArgs(ToolCallArgsEvent {
            tool_call_id: "tool1".into(),
            delta: r#"{"query":"te"#.into(),
            base: BaseEvent::default(),
        }),
        Event::ToolCallArgs(ToolCallArgsEvent {
            tool_call_id: "tool1".into(),
            delta: r#"st"}"#.into(),
            base: BaseEvent::default(),
        }),
        Event::ToolCallEnd(ToolCallEndEvent {
            tool_call_id: "tool1".into(),
            base: BaseEvent::default(),
        }),
        run_finished(),
    ]));
    let mut client = AgentClient::new(transport);
    let counting = Arc::new(Counting::default());
    client.subscribe(counting.clone());

    client.run_agent(RunAgentParams::new()).await.unwrap();

    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    let assistant = messages[0].as_assistant().expect("assistant message");
    assert_eq!(assistant.id, "msg1");
    assert_eq!(assistant.tool_calls.len(), 1);
    assert_eq!(assistant.tool_calls[0].id, "tool1");
    assert_eq!(
        assistant.tool_calls[0].function.arguments,
        r#"{"query":"test"}"#
    );
    assert_eq!(counting.tool_calls.load(Ordering::SeqCst), 1);
}

/// **Scenario**: chunked tool calls are promoted before verification, so a
/// chunk-only stream is still well-formed.
#[tokio::test]
async fn chunked_tool_call_passes_verification() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        Event::ToolCallChunk(ToolCallChunkEvent {
            tool_call_id: Some("c1".into()),
            tool_call_name: Some("lookup".into()),
            parent_message_id: None,
            delta: Some(r#"{"k":1}"#.into()),
            base: BaseEvent::default(),
        }),
        run_finished(),
    ]));
    let mut client = AgentClient::new(transport);
    client.run_agent(RunAgentParams::new()).await.unwrap();
    let messages = client.messages();
    let assistant = messages[0].as_assistant().expect("assistant message");
    assert_eq!(assistant.id, "c1");
    assert_eq!(assistant.tool_calls[0].function.arguments, r#"{"k":1}"#);
}

/// **Scenario**: a protocol violation mid-stream aborts the run; state
/// applied before the violation persists.
#[tokio::test]
async fn protocol_violation_aborts_run() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        Event::StateDelta(StateDeltaEvent {
            delta: serde_json::from_str(r#"[{"op":"add","path":"","value":{"seen":true}}]"#)
                .unwrap(),
            base: BaseEvent::default(),
        }),
        // Content without a start: structural violation.
        Event::TextMessageContent(TextMessageContentEvent {
            message_id: "ghost".into(),
            delta: "x".into(),
            base: BaseEvent::default(),
        }),
    ]));
    let mut client = AgentClient::new(transport);
    let err = client.run_agent(RunAgentParams::new()).await;
    assert!(matches!(err, Err(RunnerError::ProtocolViolation(_))));
    assert_eq!(client.state(), json!({"seen": true}));
    assert!(!client.is_running());
}

/// **Scenario**: RUN_ERROR surfaces message and code through the error path.
#[tokio::test]
async fn run_error_event_surfaces() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        Event::RunError(RunErrorEvent {
            message: "model overloaded".into(),
            code: Some("E_CAPACITY".into()),
            base: BaseEvent::default(),
        }),
    ]));
    let mut client = AgentClient::new(transport);
    match client.run_agent(RunAgentParams::new()).await {
        Err(RunnerError::RunFailed { message, code }) => {
            assert_eq!(message, "model overloaded");
            assert_eq!(code.as_deref(), Some("E_CAPACITY"));
        }
        other => panic!("expected RunFailed, got {other:?}"),
    }
}

/// **Scenario**: a transport declaring an old max version gets the
/// compatibility input: no parentRunId, flattened text content.
#[tokio::test]
async fn legacy_transport_gets_compat_input() {
    let transport = Arc::new(
        MockAgentTransport::single_run(vec![run_started(), run_finished()])
            .with_max_version("0.0.30"),
    );
    let config = AgentConfig::new().with_initial_messages(vec![Message::User(UserMessage {
        id: "u1".into(),
        content: Some(MessageContent::Parts(vec![
            ContentPart::Text { text: "see ".into() },
            ContentPart::Text {
                text: "attachment".into(),
            },
        ])),
        base: MessageBase::default(),
    })]);
    let mut client = AgentClient::with_config(transport.clone(), config);
    client.run_agent(RunAgentParams::new()).await.unwrap();

    let inputs = transport.recorded_inputs();
    assert_eq!(inputs.len(), 1);
    match &inputs[0].messages[0] {
        Message::User(u) => {
            assert_eq!(u.content, Some(MessageContent::Text("see attachment".into())));
        }
        other => panic!("expected user message, got {other:?}"),
    }

    // A current-protocol transport keeps the multi-part content.
    let transport =
        Arc::new(MockAgentTransport::single_run(vec![run_started(), run_finished()]));
    let config = AgentConfig::new().with_initial_messages(vec![Message::User(UserMessage {
        id: "u1".into(),
        content: Some(MessageContent::Parts(vec![ContentPart::Text {
            text: "parts".into(),
        }])),
        base: MessageBase::default(),
    })]);
    let mut client = AgentClient::with_config(transport.clone(), config);
    client.run_agent(RunAgentParams::new()).await.unwrap();
    match &transport.recorded_inputs()[0].messages[0] {
        Message::User(u) => {
            assert!(matches!(u.content, Some(MessageContent::Parts(_))));
        }
        other => panic!("expected user message, got {other:?}"),
    }
}

/// **Scenario**: middleware can rewrite the outbound event stream, here by
/// suppressing internal custom events before the reducer sees them.
#[tokio::test]
async fn middleware_can_suppress_events() {
    use agui_client::{FnMiddleware, RunNext};
    use agui_event::event::CustomEvent;
    use agui_event::RunAgentInput;
    use futures::StreamExt;

    let custom = |name: &str| {
        Event::Custom(CustomEvent {
            name: name.into(),
            value: serde_json::Value::Null,
            base: BaseEvent::default(),
        })
    };
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        custom("internal"),
        custom("visible"),
        run_finished(),
    ]));
    let mut client = AgentClient::new(transport);
    client.add_middleware(Arc::new(FnMiddleware::new(
        |input: RunAgentInput, next: RunNext| async move {
            let stream = next.run(input).await?;
            Ok(stream
                .filter(|event| {
                    let keep = !matches!(
                        event,
                        Ok(Event::Custom(c)) if c.name == "internal"
                    );
                    futures::future::ready(keep)
                })
                .boxed())
        },
    )));

    client.run_agent(RunAgentParams::new()).await.unwrap();
    let customs = client.custom_events();
    assert_eq!(customs.len(), 1);
    assert_eq!(customs[0].name, "visible");
}

/// **Scenario**: a text message started with an explicit role keeps it.
#[tokio::test]
async fn explicit_role_is_preserved() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        Event::TextMessageStart(TextMessageStartEvent {
            message_id: "d1".into(),
            role: Some(Role::Developer),
            base: BaseEvent::default(),
        }),
        Event::TextMessageContent(TextMessageContentEvent {
            message_id: "d1".into(),
            delta: "internal note".into(),
            base: BaseEvent::default(),
        }),
        Event::TextMessageEnd(agui_event::event::TextMessageEndEvent {
            message_id: "d1".into(),
            base: BaseEvent::default(),
        }),
        run_finished(),
    ]));
    let mut client = AgentClient::new(transport);
    client.run_agent(RunAgentParams::new()).await.unwrap();
    assert_eq!(client.messages()[0].role(), Role::Developer);
}
