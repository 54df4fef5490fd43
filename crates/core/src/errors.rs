use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("tool result `{tool_call_id}` does not answer any earlier tool call")]
    OrphanToolResult { tool_call_id: String },
    #[error("tool call `{tool_call_id}` has no result")]
    MissingToolResult { tool_call_id: String },
    #[error("tool call `{tool_call_id}` was answered more than once")]
    DuplicateToolResult { tool_call_id: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::OrphanToolResult { tool_call_id }
            | Self::MissingToolResult { tool_call_id }
            | Self::DuplicateToolResult { tool_call_id } => Some(tool_call_id),
            Self::InvariantViolation(_) => None,
        }
    }
}
