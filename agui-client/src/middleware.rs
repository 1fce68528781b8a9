//! Middleware: composable wrappers around the transport call.
//!
//! Each middleware receives the run input and a `next` handle; it may
//! transform the input, observe or rewrite the outbound event stream, or
//! replace the underlying call entirely. The chain is composed as a right
//! fold so the first registered middleware is the outermost wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use agui_event::{Message, MessageContent, RunAgentInput};

use crate::error::RunnerError;
use crate::stream::EventStream;

/// Handle to the rest of the chain: remaining middlewares plus the
/// transport itself.
#[derive(Clone)]
pub struct RunNext {
    handler: Arc<
        dyn Fn(RunAgentInput) -> BoxFuture<'static, Result<EventStream, RunnerError>>
            + Send
            + Sync,
    >,
}

impl RunNext {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(RunAgentInput) -> BoxFuture<'static, Result<EventStream, RunnerError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub async fn run(&self, input: RunAgentInput) -> Result<EventStream, RunnerError> {
        (self.handler)(input).await
    }
}

/// A wrapper around the transport call.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn run(&self, input: RunAgentInput, next: RunNext) -> Result<EventStream, RunnerError>;
}

/// Middleware from a plain async function or closure.
pub struct FnMiddleware<F> {
    f: F,
}

impl<F> FnMiddleware<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(RunAgentInput, RunNext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<EventStream, RunnerError>> + Send,
{
    async fn run(&self, input: RunAgentInput, next: RunNext) -> Result<EventStream, RunnerError> {
        (self.f)(input, next).await
    }
}

/// Right-folds the middlewares over the base handler. The first element of
/// `middlewares` ends up outermost, seeing the original input first.
pub fn compose(middlewares: &[Arc<dyn Middleware>], base: RunNext) -> RunNext {
    let mut next = base;
    for middleware in middlewares.iter().rev() {
        let middleware = Arc::clone(middleware);
        let inner = next;
        next = RunNext::new(move |input| {
            let middleware = Arc::clone(&middleware);
            let inner = inner.clone();
            Box::pin(async move { middleware.run(input, inner).await })
        });
    }
    next
}

/// Protocol version up to which agents need the legacy input shape.
pub const LEGACY_INPUT_MAX_VERSION: &str = "0.0.39";

/// Backward compatibility for old agents: strips `parentRunId` (unknown to
/// them) and flattens multi-part message content into plain text.
///
/// Auto-inserted by the orchestrator for transports whose declared
/// `max_version` is at most [`LEGACY_INPUT_MAX_VERSION`].
pub struct CompatibilityMiddleware;

impl CompatibilityMiddleware {
    /// Whether a transport declaring `max_version` needs this middleware.
    pub fn applies_to(max_version: &str) -> bool {
        version_lte(max_version, LEGACY_INPUT_MAX_VERSION)
    }
}

#[async_trait]
impl Middleware for CompatibilityMiddleware {
    async fn run(
        &self,
        mut input: RunAgentInput,
        next: RunNext,
    ) -> Result<EventStream, RunnerError> {
        input.parent_run_id = None;
        for message in &mut input.messages {
            flatten_content(message);
        }
        next.run(input).await
    }
}

fn flatten_content(message: &mut Message) {
    let content = match message {
        Message::User(m) => &mut m.content,
        Message::Assistant(m) => &mut m.content,
        Message::System(m) => &mut m.content,
        Message::Developer(m) => &mut m.content,
        Message::Tool(_) | Message::Activity(_) => return,
    };
    if let Some(MessageContent::Parts(_)) = content {
        let text = content.as_ref().map(MessageContent::to_text).unwrap_or_default();
        *content = Some(MessageContent::Text(text));
    }
}

/// Numeric dotted-version comparison; missing components count as zero,
/// unparsable components as pre-release (zero).
fn version_lte(left: &str, right: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (l, r) = (parse(left), parse(right));
    let len = l.len().max(r.len());
    for i in 0..len {
        let a = l.get(i).copied().unwrap_or(0);
        let b = r.get(i).copied().unwrap_or(0);
        if a != b {
            return a < b;
        }
    }
    true
}
