use std::collections::{HashSet, VecDeque};

use crate::domain::message::{Message, Role};
use crate::errors::DomainError;

/// Checks tool-call correlation across a transcript: every tool result answers a
/// request issued earlier, results arrive in request order, and each request group
/// is fully answered before any other message follows it.
///
/// Call ids only need to be unique within one request group. Providers that number
/// calls per response reuse ids across rounds.
pub fn verify_tool_correlation(messages: &[Message]) -> Result<(), DomainError> {
    let mut pending: VecDeque<&str> = VecDeque::new();
    let mut requested: HashSet<&str> = HashSet::new();

    for message in messages {
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    DomainError::InvariantViolation("tool message without tool_call_id".to_owned())
                })?;

                match pending.front() {
                    Some(expected) if *expected == id => {
                        pending.pop_front();
                    }
                    Some(_) if pending.contains(&id) => {
                        return Err(DomainError::InvariantViolation(format!(
                            "tool result `{id}` is out of request order"
                        )));
                    }
                    _ if requested.contains(id) => {
                        return Err(DomainError::DuplicateToolResult {
                            tool_call_id: id.to_owned(),
                        });
                    }
                    _ => return Err(DomainError::OrphanToolResult { tool_call_id: id.to_owned() }),
                }
            }
            _ => {
                if let Some(missing) = pending.front() {
                    return Err(DomainError::MissingToolResult {
                        tool_call_id: (*missing).to_owned(),
                    });
                }

                if message.requests_tools() {
                    requested.clear();
                    for call in &message.tool_calls {
                        if !requested.insert(call.id.as_str()) {
                            return Err(DomainError::InvariantViolation(format!(
                                "tool call id `{}` was issued twice in one response",
                                call.id
                            )));
                        }
                        pending.push_back(call.id.as_str());
                    }
                }
            }
        }
    }

    match pending.front() {
        Some(missing) => {
            Err(DomainError::MissingToolResult { tool_call_id: (*missing).to_owned() })
        }
        None => Ok(()),
    }
}
