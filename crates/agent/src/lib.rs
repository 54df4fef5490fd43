//! Agent Runtime - the model/tool loop behind every chat turn
//!
//! This crate turns one inbound chat message into one reply:
//! - Keeps a per-user, per-channel transcript and drops redelivered events (`session`)
//! - Advertises tool schemas and validates model-supplied arguments (`schema`, `tools`)
//! - Runs requested tools concurrently with per-call timeouts (`dispatcher`)
//! - Drives the model until it answers or a guardrail stops it (`runtime`, `guardrails`)
//!
//! # Architecture
//!
//! Each turn follows a bounded loop:
//! 1. **Dedupe** - a repeated event id for the session returns without side effects
//! 2. **Model call** (`llm`) - the full transcript plus tool specs go to the provider
//! 3. **Tool round** (`dispatcher`) - every requested call yields exactly one result
//! 4. **Stop** - final text, a provider failure, or the round limit ends the turn
//!
//! # Key Types
//!
//! - `AgentRuntime` - Orchestrator (see `runtime` module)
//! - `LlmClient` - Pluggable model client
//! - `ToolRegistry` / `ToolDispatcher` - Tool table and its executor
//! - `SessionStore` - Transcripts and processed event ids
//!
//! The built-in analyst tools live in `catalog`; their data and rendering
//! collaborators are traits so deployments can plug in real backends.

pub mod catalog;
pub mod dispatcher;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod schema;
pub mod session;
pub mod tools;

pub use runtime::{AgentRuntime, TurnReply, TurnStatus};
