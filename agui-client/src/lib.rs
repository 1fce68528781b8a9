//! # agui-client
//!
//! Client-side runtime for the Agent User Interaction (AG-UI) protocol:
//! turns a raw, unreliable event stream from a remote agent into a
//! deterministic, observable conversation state, extensible through
//! middleware and subscribers.
//!
//! ## Pipeline
//!
//! ```text
//! transport ──► normalize ──► verify ──► apply ──► AgentClient ──► application
//!                  ▲                        ▲            ▲
//!                  │                        │            │
//!                  └── middleware chain ────┴─ subscribers
//! ```
//!
//! - [`normalize`]: promotes compacted chunk events into canonical
//!   start/content/end triads ([`ChunkNormalizer`]).
//! - [`verify`]: enforces protocol well-formedness with a pure state
//!   machine ([`EventVerifier`]); violations abort the run.
//! - [`apply`]: folds events into messages, state, raw/custom logs, and
//!   thinking telemetry, driving subscriber callbacks with mutation
//!   semantics ([`EventApplier`], [`StateMutation`]).
//! - [`agent`]: owns the conversation identity and state, composes
//!   middleware, runs the pipeline, and surfaces `{result, new_messages}`
//!   ([`AgentClient`], [`AgentTransport`]).
//!
//! ## Extension points
//!
//! - [`AgentSubscriber`]: a bag of optional async callbacks. Event hooks may
//!   rewrite the working messages/state and stop propagation; derived-state
//!   hooks observe changes. Every callback sees deep copies.
//! - [`Middleware`]: wraps the transport call (`run(input, next)`), composed
//!   as a right fold; [`FnMiddleware`] adapts plain closures. A built-in
//!   [`CompatibilityMiddleware`] downgrades the input shape for old agents.
//!
//! ## Concurrency model
//!
//! The core is single-threaded cooperative: events are processed strictly
//! in order, and all subscriber callbacks for one event complete before the
//! next event is applied. Cancellation is cooperative via
//! [`AgentClient::abort_run`]; partial updates already applied persist.
//!
//! Wire types live in the `agui-event` crate and are re-exported here.

pub mod agent;
pub mod apply;
pub mod error;
pub mod middleware;
pub mod normalize;
pub mod patch;
pub mod stream;
pub mod subscriber;
pub mod untruncate;
pub mod verify;

pub use agent::mock::{MockAgentTransport, RunScript};
pub use agent::{
    AgentClient, AgentConfig, AgentTransport, ConversationState, RunAbortHandle, RunAgentParams,
    RunAgentResult, SubscriptionId, ThinkingTrace,
};
pub use apply::{EventApplier, StateMutation};
pub use error::RunnerError;
pub use middleware::{CompatibilityMiddleware, FnMiddleware, Middleware, RunNext};
pub use normalize::ChunkNormalizer;
pub use patch::{apply_patch, PatchError};
pub use stream::{channel_stream, events_stream, EventStream};
pub use subscriber::{
    AgentSubscriber, SubscriberMutation, SubscriberParams, SubscriberResult, ToolCallArgsSnapshot,
};
pub use untruncate::{parse_partial_json, untruncate_json};
pub use verify::EventVerifier;

pub use agui_event::{
    Context, Event, EventType, Message, Role, RunAgentInput, Tool, ToolCall,
};
