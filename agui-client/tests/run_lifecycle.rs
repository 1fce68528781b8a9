//! Integration tests: run lifecycle across the full orchestrator surface:
//! sequential runs, result capture, failure routing, connect channel.

mod init_logging;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use agui_client::subscriber::{SubscriberMutation, SubscriberParams, SubscriberResult};
use agui_client::{
    AgentClient, AgentSubscriber, MockAgentTransport, RunAgentParams, RunScript, RunnerError,
};
use agui_event::event::{
    BaseEvent, RunFinishedEvent, RunStartedEvent, TextMessageContentEvent, TextMessageEndEvent,
    TextMessageStartEvent,
};
use agui_event::{Event, Role};

fn run_started() -> Event {
    Event::RunStarted(RunStartedEvent {
        thread_id: "t1".into(),
        run_id: "r1".into(),
        input: None,
        base: BaseEvent::default(),
    })
}

fn run_finished(result: Option<serde_json::Value>) -> Event {
    Event::RunFinished(RunFinishedEvent {
        thread_id: "t1".into(),
        run_id: "r1".into(),
        result,
        base: BaseEvent::default(),
    })
}

fn text_message(id: &str, content: &str) -> Vec<Event> {
    vec![
        Event::TextMessageStart(TextMessageStartEvent {
            message_id: id.into(),
            role: Some(Role::Assistant),
            base: BaseEvent::default(),
        }),
        Event::TextMessageContent(TextMessageContentEvent {
            message_id: id.into(),
            delta: content.into(),
            base: BaseEvent::default(),
        }),
        Event::TextMessageEnd(TextMessageEndEvent {
            message_id: id.into(),
            base: BaseEvent::default(),
        }),
    ]
}

fn run_with_message(id: &str, content: &str) -> RunScript {
    let mut events = vec![run_started()];
    events.extend(text_message(id, content));
    events.push(run_finished(None));
    RunScript::events(events)
}

/// **Scenario**: three sequential runs accumulate messages; each run reports
/// exactly its own new message.
#[tokio::test]
async fn three_sequential_runs_accumulate_messages() {
    let transport = Arc::new(MockAgentTransport::new(vec![
        run_with_message("msg1", "Message 1"),
        run_with_message("msg2", "Message 2"),
        run_with_message("msg3", "Message 3"),
    ]));
    let mut client = AgentClient::new(transport);

    for expected in ["Message 1", "Message 2", "Message 3"] {
        let result = client.run_agent(RunAgentParams::new()).await.unwrap();
        assert_eq!(result.new_messages.len(), 1);
        assert_eq!(
            result.new_messages[0].content_text().as_deref(),
            Some(expected)
        );
    }

    let messages = client.messages();
    assert_eq!(messages.len(), 3);
    let ids: Vec<_> = messages.iter().map(|m| m.id().to_string()).collect();
    assert_eq!(ids, vec!["msg1", "msg2", "msg3"]);
    assert_eq!(messages[0].content_text().as_deref(), Some("Message 1"));
    assert_eq!(messages[2].content_text().as_deref(), Some("Message 3"));
}

/// **Scenario**: the result of the final RUN_FINISHED is surfaced verbatim.
#[tokio::test]
async fn run_finished_result_is_surfaced() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        run_finished(Some(json!({"answer": 42}))),
    ]));
    let mut client = AgentClient::new(transport);
    let result = client.run_agent(RunAgentParams::new()).await.unwrap();
    assert_eq!(result.result, Some(json!({"answer": 42})));
    assert!(result.new_messages.is_empty());
}

/// **Scenario**: a subscriber's on_run_failed with stop_propagation turns a
/// mid-run transport failure into a normal completion with an empty result;
/// on_run_finalized still fires.
#[tokio::test]
async fn stop_propagation_downgrades_failure() {
    #[derive(Default)]
    struct Recovering {
        failed: AtomicUsize,
        finalized: AtomicUsize,
    }

    #[async_trait]
    impl AgentSubscriber for Recovering {
        async fn on_run_failed(
            &self,
            error: &RunnerError,
            _params: &SubscriberParams,
        ) -> SubscriberResult {
            assert!(matches!(error, RunnerError::Transport(_)));
            self.failed.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriberMutation {
                stop_propagation: true,
                ..Default::default()
            })
        }

        async fn on_run_finalized(&self, _params: &SubscriberParams) -> SubscriberResult {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriberMutation::none())
        }
    }

    let mut events = vec![run_started()];
    events.extend(text_message("m1", "partial"));
    let transport = Arc::new(MockAgentTransport::new(vec![RunScript::failing(
        events,
        "connection reset",
    )]));
    let mut client = AgentClient::new(transport);
    let recovering = Arc::new(Recovering::default());
    client.subscribe(recovering.clone());

    let result = client.run_agent(RunAgentParams::new()).await.unwrap();
    assert!(result.result.is_none());
    assert!(result.new_messages.is_empty());
    assert_eq!(recovering.failed.load(Ordering::SeqCst), 1);
    assert_eq!(recovering.finalized.load(Ordering::SeqCst), 1);
    // Partial updates applied before the failure persist.
    assert_eq!(client.messages().len(), 1);
    assert!(!client.is_running());
}

/// **Scenario**: without stop_propagation the failure surfaces, and
/// on_run_finalized still fires.
#[tokio::test]
async fn failure_surfaces_without_stop_propagation() {
    #[derive(Default)]
    struct Watching {
        finalized: AtomicUsize,
    }

    #[async_trait]
    impl AgentSubscriber for Watching {
        async fn on_run_finalized(&self, _params: &SubscriberParams) -> SubscriberResult {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriberMutation::none())
        }
    }

    let transport = Arc::new(MockAgentTransport::new(vec![RunScript::failing(
        vec![run_started()],
        "connection reset",
    )]));
    let mut client = AgentClient::new(transport);
    let watching = Arc::new(Watching::default());
    client.subscribe(watching.clone());

    let err = client.run_agent(RunAgentParams::new()).await;
    assert!(matches!(err, Err(RunnerError::Transport(_))));
    assert_eq!(watching.finalized.load(Ordering::SeqCst), 1);
}

/// **Scenario**: connect_agent on a transport without a persistent channel
/// fails with NOT_IMPLEMENTED.
#[tokio::test]
async fn connect_without_channel_is_not_implemented() {
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        run_finished(None),
    ]));
    let mut client = AgentClient::new(transport);
    let err = client.connect_agent(RunAgentParams::new()).await;
    assert!(matches!(err, Err(RunnerError::NotImplemented)));
}

/// **Scenario**: connect_agent drives the same pipeline when the transport
/// implements the persistent channel.
#[tokio::test]
async fn connect_runs_pipeline_when_implemented() {
    let mut events = vec![run_started()];
    events.extend(text_message("m1", "via connect"));
    events.push(run_finished(None));
    let transport =
        Arc::new(MockAgentTransport::new(vec![RunScript::events(events)]).with_connect());
    let mut client = AgentClient::new(transport);
    let result = client.connect_agent(RunAgentParams::new()).await.unwrap();
    assert_eq!(result.new_messages.len(), 1);
    assert_eq!(client.messages().len(), 1);
}

/// **Scenario**: subscribers run in registration order with the temporary
/// run subscriber last.
#[tokio::test]
async fn subscriber_order_is_registration_then_temporary() {
    struct Tagger(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl AgentSubscriber for Tagger {
        async fn on_run_initialized(&self, _params: &SubscriberParams) -> SubscriberResult {
            self.1.lock().unwrap().push(self.0);
            Ok(SubscriberMutation::none())
        }
    }

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockAgentTransport::single_run(vec![
        run_started(),
        run_finished(None),
    ]));
    let mut client = AgentClient::new(transport);
    client.subscribe(Arc::new(Tagger("first", order.clone())));
    client.subscribe(Arc::new(Tagger("second", order.clone())));

    client
        .run_agent(
            RunAgentParams::new().with_subscriber(Arc::new(Tagger("temporary", order.clone()))),
        )
        .await
        .unwrap();

    assert_eq!(
        order.lock().unwrap().as_slice(),
        ["first", "second", "temporary"]
    );
}
