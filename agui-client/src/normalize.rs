//! Chunk normalization: rewrites compacted TEXT_MESSAGE_CHUNK and
//! TOOL_CALL_CHUNK events into the canonical start/content/end triads.
//!
//! The normalizer is stateful and single-pass: events are processed in order
//! and never reordered. Already-normalized streams pass through unchanged.

use async_stream::try_stream;
use futures::StreamExt;

use agui_event::event::{
    BaseEvent, Event, TextMessageContentEvent, TextMessageEndEvent, TextMessageStartEvent,
    ToolCallArgsEvent, ToolCallEndEvent, ToolCallStartEvent,
};
use agui_event::Role;

use crate::error::RunnerError;
use crate::stream::EventStream;

/// Which streamed segment the chunk rewriter is currently inside.
///
/// `from_chunk` records whether the segment was opened by a chunk, in which
/// case the matching end must be synthesized; segments opened by explicit
/// lifecycle events end themselves.
#[derive(Clone, Debug, PartialEq)]
enum ChunkMode {
    Idle,
    Text {
        message_id: String,
        from_chunk: bool,
    },
    Tool {
        tool_call_id: String,
        from_chunk: bool,
    },
}

/// Rewrites chunk events into canonical triads; passes everything else
/// through in order.
pub struct ChunkNormalizer {
    mode: ChunkMode,
    /// Base fields of the most recent chunk, reused on synthesized ends.
    last_base: BaseEvent,
}

impl ChunkNormalizer {
    pub fn new() -> Self {
        Self {
            mode: ChunkMode::Idle,
            last_base: BaseEvent::default(),
        }
    }

    /// Processes one upstream event, returning the events to emit downstream.
    pub fn feed(&mut self, event: Event) -> Result<Vec<Event>, RunnerError> {
        let mut out = Vec::with_capacity(2);
        match event {
            Event::TextMessageChunk(chunk) => {
                let continues = matches!(
                    &self.mode,
                    ChunkMode::Text { message_id, .. }
                        if chunk.message_id.as_deref().is_none_or(|id| id == message_id.as_str())
                );
                if continues {
                    self.last_base = chunk.base.clone();
                    if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                        let ChunkMode::Text { message_id, .. } = &self.mode else {
                            unreachable!()
                        };
                        out.push(Event::TextMessageContent(TextMessageContentEvent {
                            message_id: message_id.clone(),
                            delta,
                            base: chunk.base,
                        }));
                    }
                } else {
                    self.close_chunked_segment(&mut out);
                    let message_id = chunk.message_id.ok_or_else(|| {
                        RunnerError::MalformedStream(
                            "first TEXT_MESSAGE_CHUNK of a message must carry a messageId".into(),
                        )
                    })?;
                    self.mode = ChunkMode::Text {
                        message_id: message_id.clone(),
                        from_chunk: true,
                    };
                    self.last_base = chunk.base.clone();
                    out.push(Event::TextMessageStart(TextMessageStartEvent {
                        message_id: message_id.clone(),
                        role: Some(chunk.role.unwrap_or(Role::Assistant)),
                        base: chunk.base.clone(),
                    }));
                    if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                        out.push(Event::TextMessageContent(TextMessageContentEvent {
                            message_id,
                            delta,
                            base: chunk.base,
                        }));
                    }
                }
            }
            Event::ToolCallChunk(chunk) => {
                let continues = matches!(
                    &self.mode,
                    ChunkMode::Tool { tool_call_id, .. }
                        if chunk.tool_call_id.as_deref().is_none_or(|id| id == tool_call_id.as_str())
                );
                if continues {
                    self.last_base = chunk.base.clone();
                    if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                        let ChunkMode::Tool { tool_call_id, .. } = &self.mode else {
                            unreachable!()
                        };
                        out.push(Event::ToolCallArgs(ToolCallArgsEvent {
                            tool_call_id: tool_call_id.clone(),
                            delta,
                            base: chunk.base,
                        }));
                    }
                } else {
                    self.close_chunked_segment(&mut out);
                    let (tool_call_id, tool_call_name) =
                        match (chunk.tool_call_id, chunk.tool_call_name) {
                            (Some(id), Some(name)) => (id, name),
                            _ => {
                                return Err(RunnerError::MalformedStream(
                                    "first TOOL_CALL_CHUNK of a call must carry toolCallId and toolCallName"
                                        .into(),
                                ))
                            }
                        };
                    self.mode = ChunkMode::Tool {
                        tool_call_id: tool_call_id.clone(),
                        from_chunk: true,
                    };
                    self.last_base = chunk.base.clone();
                    out.push(Event::ToolCallStart(ToolCallStartEvent {
                        tool_call_id: tool_call_id.clone(),
                        tool_call_name,
                        parent_message_id: chunk.parent_message_id,
                        base: chunk.base.clone(),
                    }));
                    if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                        out.push(Event::ToolCallArgs(ToolCallArgsEvent {
                            tool_call_id,
                            delta,
                            base: chunk.base,
                        }));
                    }
                }
            }
            Event::TextMessageStart(e) => {
                self.close_chunked_segment(&mut out);
                self.mode = ChunkMode::Text {
                    message_id: e.message_id.clone(),
                    from_chunk: false,
                };
                out.push(Event::TextMessageStart(e));
            }
            Event::TextMessageContent(e) => {
                self.close_chunked_segment(&mut out);
                self.mode = ChunkMode::Text {
                    message_id: e.message_id.clone(),
                    from_chunk: false,
                };
                out.push(Event::TextMessageContent(e));
            }
            Event::TextMessageEnd(e) => {
                self.close_chunked_segment(&mut out);
                self.mode = ChunkMode::Idle;
                out.push(Event::TextMessageEnd(e));
            }
            Event::ToolCallStart(e) => {
                self.close_chunked_segment(&mut out);
                self.mode = ChunkMode::Tool {
                    tool_call_id: e.tool_call_id.clone(),
                    from_chunk: false,
                };
                out.push(Event::ToolCallStart(e));
            }
            Event::ToolCallArgs(e) => {
                self.close_chunked_segment(&mut out);
                self.mode = ChunkMode::Tool {
                    tool_call_id: e.tool_call_id.clone(),
                    from_chunk: false,
                };
                out.push(Event::ToolCallArgs(e));
            }
            Event::ToolCallEnd(e) => {
                self.close_chunked_segment(&mut out);
                self.mode = ChunkMode::Idle;
                out.push(Event::ToolCallEnd(e));
            }
            // Terminal run events end the stream protocol-wise; an open
            // chunked segment must close before them, not after.
            Event::RunFinished(e) => {
                self.close_chunked_segment(&mut out);
                out.push(Event::RunFinished(e));
            }
            Event::RunError(e) => {
                self.close_chunked_segment(&mut out);
                out.push(Event::RunError(e));
            }
            other => out.push(other),
        }
        Ok(out)
    }

    /// Closes a still-open chunked segment at upstream termination.
    pub fn finish(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        self.close_chunked_segment(&mut out);
        self.mode = ChunkMode::Idle;
        out
    }

    /// Synthesizes the matching end for an in-flight chunk-opened segment.
    /// Segments opened by explicit lifecycle events are left alone.
    fn close_chunked_segment(&mut self, out: &mut Vec<Event>) {
        match std::mem::replace(&mut self.mode, ChunkMode::Idle) {
            ChunkMode::Text {
                message_id,
                from_chunk: true,
            } => out.push(Event::TextMessageEnd(TextMessageEndEvent {
                message_id,
                base: self.last_base.clone(),
            })),
            ChunkMode::Tool {
                tool_call_id,
                from_chunk: true,
            } => out.push(Event::ToolCallEnd(ToolCallEndEvent {
                tool_call_id,
                base: self.last_base.clone(),
            })),
            _ => {}
        }
    }
}

impl Default for ChunkNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream stage: normalizes chunk events, preserving order and laziness.
pub fn normalize(mut upstream: EventStream) -> EventStream {
    Box::pin(try_stream! {
        let mut normalizer = ChunkNormalizer::new();
        while let Some(event) = upstream.next().await {
            for out in normalizer.feed(event?)? {
                yield out;
            }
        }
        for out in normalizer.finish() {
            yield out;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agui_event::event::{RunFinishedEvent, TextMessageChunkEvent, ToolCallChunkEvent};
    use agui_event::EventType;

    fn text_chunk(id: Option<&str>, delta: Option<&str>) -> Event {
        Event::TextMessageChunk(TextMessageChunkEvent {
            message_id: id.map(String::from),
            role: None,
            delta: delta.map(String::from),
            base: BaseEvent::default(),
        })
    }

    fn tool_chunk(id: Option<&str>, name: Option<&str>, delta: Option<&str>) -> Event {
        Event::ToolCallChunk(ToolCallChunkEvent {
            tool_call_id: id.map(String::from),
            tool_call_name: name.map(String::from),
            parent_message_id: None,
            delta: delta.map(String::from),
            base: BaseEvent::default(),
        })
    }

    fn kinds(events: &[Event]) -> Vec<EventType> {
        events.iter().map(Event::event_type).collect()
    }

    /// **Scenario**: text chunks become START + CONTENTs, with the END
    /// synthesized at stream termination.
    #[test]
    fn text_chunks_promote_to_triad() {
        let mut n = ChunkNormalizer::new();
        let mut events = n.feed(text_chunk(Some("m1"), Some("Hel"))).unwrap();
        events.extend(n.feed(text_chunk(None, Some("lo"))).unwrap());
        events.extend(n.finish());
        assert_eq!(
            kinds(&events),
            vec![
                EventType::TextMessageStart,
                EventType::TextMessageContent,
                EventType::TextMessageContent,
                EventType::TextMessageEnd,
            ]
        );
        match &events[0] {
            Event::TextMessageStart(s) => {
                assert_eq!(s.message_id, "m1");
                assert_eq!(s.role, Some(Role::Assistant));
            }
            other => panic!("expected start, got {other:?}"),
        }
        match &events[3] {
            Event::TextMessageEnd(e) => assert_eq!(e.message_id, "m1"),
            other => panic!("expected end, got {other:?}"),
        }
    }

    /// **Scenario**: the first chunk of a message must carry an id.
    #[test]
    fn first_text_chunk_without_id_fails() {
        let mut n = ChunkNormalizer::new();
        let err = n.feed(text_chunk(None, Some("x")));
        assert!(matches!(err, Err(RunnerError::MalformedStream(_))));
    }

    /// **Scenario**: the first tool chunk must carry both id and name.
    #[test]
    fn first_tool_chunk_without_name_fails() {
        let mut n = ChunkNormalizer::new();
        let err = n.feed(tool_chunk(Some("c1"), None, Some("{}")));
        assert!(matches!(err, Err(RunnerError::MalformedStream(_))));
    }

    /// **Scenario**: a chunk for a different message closes the previous
    /// chunked segment before opening the next.
    #[test]
    fn id_switch_closes_previous_segment() {
        let mut n = ChunkNormalizer::new();
        let mut events = n.feed(text_chunk(Some("m1"), Some("a"))).unwrap();
        events.extend(n.feed(text_chunk(Some("m2"), Some("b"))).unwrap());
        assert_eq!(
            kinds(&events),
            vec![
                EventType::TextMessageStart,
                EventType::TextMessageContent,
                EventType::TextMessageEnd,
                EventType::TextMessageStart,
                EventType::TextMessageContent,
            ]
        );
        match &events[2] {
            Event::TextMessageEnd(e) => assert_eq!(e.message_id, "m1"),
            other => panic!("expected end of m1, got {other:?}"),
        }
    }

    /// **Scenario**: switching from text chunks to tool chunks synthesizes
    /// the text end first.
    #[test]
    fn tool_chunk_closes_open_text_segment() {
        let mut n = ChunkNormalizer::new();
        let mut events = n.feed(text_chunk(Some("m1"), Some("a"))).unwrap();
        events.extend(
            n.feed(tool_chunk(Some("c1"), Some("search"), Some("{\"q\":")))
                .unwrap(),
        );
        events.extend(n.finish());
        assert_eq!(
            kinds(&events),
            vec![
                EventType::TextMessageStart,
                EventType::TextMessageContent,
                EventType::TextMessageEnd,
                EventType::ToolCallStart,
                EventType::ToolCallArgs,
                EventType::ToolCallEnd,
            ]
        );
    }

    /// **Scenario**: an empty or missing delta on a continuation chunk emits
    /// nothing.
    #[test]
    fn empty_delta_continuation_emits_nothing() {
        let mut n = ChunkNormalizer::new();
        n.feed(text_chunk(Some("m1"), Some("a"))).unwrap();
        assert!(n.feed(text_chunk(None, None)).unwrap().is_empty());
        assert!(n.feed(text_chunk(Some("m1"), Some(""))).unwrap().is_empty());
    }

    /// **Scenario**: already-normalized streams pass through unchanged
    /// (normalization is idempotent).
    #[test]
    fn normalized_stream_passes_through() {
        let triad = vec![
            Event::TextMessageStart(TextMessageStartEvent {
                message_id: "m1".into(),
                role: Some(Role::Assistant),
                base: BaseEvent::default(),
            }),
            Event::TextMessageContent(TextMessageContentEvent {
                message_id: "m1".into(),
                delta: "hi".into(),
                base: BaseEvent::default(),
            }),
            Event::TextMessageEnd(TextMessageEndEvent {
                message_id: "m1".into(),
                base: BaseEvent::default(),
            }),
        ];
        let mut n = ChunkNormalizer::new();
        let mut out = Vec::new();
        for ev in triad.clone() {
            out.extend(n.feed(ev).unwrap());
        }
        out.extend(n.finish());
        assert_eq!(out, triad);
    }

    /// **Scenario**: an explicit lifecycle event closes an in-flight chunked
    /// tool call.
    #[test]
    fn explicit_event_closes_chunked_tool_call() {
        let mut n = ChunkNormalizer::new();
        let mut events = n
            .feed(tool_chunk(Some("c1"), Some("search"), Some("{}")))
            .unwrap();
        events.extend(
            n.feed(Event::TextMessageStart(TextMessageStartEvent {
                message_id: "m9".into(),
                role: None,
                base: BaseEvent::default(),
            }))
            .unwrap(),
        );
        assert_eq!(
            kinds(&events),
            vec![
                EventType::ToolCallStart,
                EventType::ToolCallArgs,
                EventType::ToolCallEnd,
                EventType::TextMessageStart,
            ]
        );
        // The explicitly opened message is not chunk-owned: no synthetic end.
        assert!(n.finish().is_empty());
    }

    /// **Scenario**: synthesized ends reuse the last chunk's timestamp and
    /// raw event.
    #[test]
    fn synthesized_end_carries_last_chunk_base() {
        let mut n = ChunkNormalizer::new();
        n.feed(Event::TextMessageChunk(TextMessageChunkEvent {
            message_id: Some("m1".into()),
            role: None,
            delta: Some("x".into()),
            base: BaseEvent {
                timestamp: Some(42),
                raw_event: Some(serde_json::json!({"n": 1})),
            },
        }))
        .unwrap();
        let out = n.finish();
        match &out[0] {
            Event::TextMessageEnd(e) => {
                assert_eq!(e.base.timestamp, Some(42));
                assert_eq!(e.base.raw_event, Some(serde_json::json!({"n": 1})));
            }
            other => panic!("expected end, got {other:?}"),
        }
    }

    /// **Scenario**: non-streaming events pass through without disturbing an
    /// open chunked segment.
    #[test]
    fn unrelated_events_do_not_close_chunk_segment() {
        let mut n = ChunkNormalizer::new();
        n.feed(text_chunk(Some("m1"), Some("a"))).unwrap();
        let passed = n
            .feed(Event::Custom(agui_event::event::CustomEvent {
                name: "Tick".into(),
                value: serde_json::Value::Null,
                base: BaseEvent::default(),
            }))
            .unwrap();
        assert_eq!(kinds(&passed), vec![EventType::Custom]);
        // Continuation still works afterwards.
        let more = n.feed(text_chunk(None, Some("b"))).unwrap();
        assert_eq!(kinds(&more), vec![EventType::TextMessageContent]);
    }

    /// **Scenario**: a terminal run event closes the chunked segment before
    /// itself, so the triad completes inside the run.
    #[test]
    fn run_finished_closes_chunk_segment_first() {
        let mut n = ChunkNormalizer::new();
        let mut events = n.feed(text_chunk(Some("m1"), Some("hi"))).unwrap();
        events.extend(
            n.feed(Event::RunFinished(RunFinishedEvent {
                thread_id: "t1".into(),
                run_id: "r1".into(),
                result: None,
                base: BaseEvent::default(),
            }))
            .unwrap(),
        );
        assert_eq!(
            kinds(&events),
            vec![
                EventType::TextMessageStart,
                EventType::TextMessageContent,
                EventType::TextMessageEnd,
                EventType::RunFinished,
            ]
        );
        assert!(n.finish().is_empty());
    }

    /// **Scenario**: the stream stage normalizes lazily and appends the
    /// synthesized end after upstream termination.
    #[tokio::test]
    async fn stream_stage_normalizes() {
        let upstream = crate::stream::events_stream(vec![
            text_chunk(Some("m1"), Some("he")),
            text_chunk(None, Some("y")),
        ]);
        let events: Vec<_> = normalize(upstream)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(
            kinds(&events),
            vec![
                EventType::TextMessageStart,
                EventType::TextMessageContent,
                EventType::TextMessageContent,
                EventType::TextMessageEnd,
            ]
        );
    }
}
