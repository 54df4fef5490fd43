//! Shared building blocks for the parley assistant.
//!
//! - `config`: layered application configuration (defaults, file, env, overrides)
//! - `domain`: transcript messages, tool call correlation, and session identity
//! - `audit`: structured audit events emitted by the orchestration loop
//! - `prompt`: the system prompt that opens each session

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod prompt;

pub use audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use domain::message::{
    Attachment, Content, Message, Role, ToolArguments, ToolCallRequest, ToolResult,
};
pub use domain::session::SessionKey;
pub use domain::transcript::verify_tool_correlation;
pub use errors::DomainError;
