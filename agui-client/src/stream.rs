//! The per-run event sequence: a lazy, ordered, finite stream.

use futures::stream::BoxStream;
use futures::StreamExt;

use agui_event::Event;

use crate::error::RunnerError;

/// One run's event sequence. Lazy, processed strictly in order, terminated
/// by exhaustion, an error item, or cancellation.
pub type EventStream = BoxStream<'static, Result<Event, RunnerError>>;

/// Builds a scripted stream from already-materialized events.
///
/// Used by tests and in-process transports; real transports produce their
/// streams lazily.
pub fn events_stream<I>(events: I) -> EventStream
where
    I: IntoIterator<Item = Event>,
    I::IntoIter: Send + 'static,
{
    futures::stream::iter(events.into_iter().map(Ok)).boxed()
}

/// Builds a push-driven stream for transports that receive events from a
/// background task (WebSocket readers, subscription channels).
///
/// The stream ends when every sender is dropped. Capacity bounds the
/// producer; there is no other backpressure at this layer.
pub fn channel_stream(
    capacity: usize,
) -> (
    tokio::sync::mpsc::Sender<Result<Event, RunnerError>>,
    EventStream,
) {
    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    (tx, tokio_stream::wrappers::ReceiverStream::new(rx).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agui_event::event::{BaseEvent, RunStartedEvent};

    #[tokio::test]
    async fn channel_stream_ends_when_sender_drops() {
        let (tx, mut stream) = channel_stream(8);
        tx.send(Ok(Event::RunStarted(RunStartedEvent {
            thread_id: "t1".into(),
            run_id: "r1".into(),
            input: None,
            base: BaseEvent::default(),
        })))
        .await
        .unwrap();
        drop(tx);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn events_stream_yields_in_order() {
        let mut stream = events_stream(vec![
            Event::RunStarted(RunStartedEvent {
                thread_id: "t1".into(),
                run_id: "r1".into(),
                input: None,
                base: BaseEvent::default(),
            }),
        ]);
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, Event::RunStarted(_)));
        assert!(stream.next().await.is_none());
    }
}
