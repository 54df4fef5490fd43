use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parley_core::{ToolCallRequest, ToolResult};
use tracing::{debug, warn};

use crate::schema::ArgumentError;
use crate::tools::ToolRegistry;

/// Runs model-requested tool calls. Every failure, including an unknown tool name,
/// comes back as an error `ToolResult` for the model to read; dispatch never fails.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolResult {
        let tool = match self.registry.lookup(&request.name) {
            Ok(tool) => tool,
            Err(_) => {
                warn!(
                    event_name = "agent.tool.unknown",
                    tool_call_id = %request.id,
                    tool = %request.name,
                    "model requested an unknown tool"
                );
                return ToolResult::failure(
                    &request.id,
                    format!(
                        "unknown tool `{}`; available tools: {}",
                        request.name,
                        self.registry.names().join(", ")
                    ),
                );
            }
        };

        let arguments = match tool.spec.validate(&request.arguments) {
            Ok(arguments) => arguments,
            Err(errors) => {
                warn!(
                    event_name = "agent.tool.invalid_arguments",
                    tool_call_id = %request.id,
                    tool = %request.name,
                    problems = errors.len(),
                    "rejected tool arguments before invoking handler"
                );
                return ToolResult::failure(
                    &request.id,
                    format!("invalid arguments for `{}`: {}", request.name, join_errors(&errors)),
                );
            }
        };

        let handler = Arc::clone(tool.handler);
        let mut task = tokio::spawn(async move { handler.execute(arguments).await });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(output))) => {
                debug!(
                    event_name = "agent.tool.succeeded",
                    tool_call_id = %request.id,
                    tool = %request.name,
                    attachments = output.attachments.len(),
                    "tool call succeeded"
                );
                ToolResult::success(&request.id, output.content)
                    .with_attachments(output.attachments)
            }
            Ok(Ok(Err(failure))) => {
                warn!(
                    event_name = "agent.tool.failed",
                    tool_call_id = %request.id,
                    tool = %request.name,
                    error = %failure,
                    "tool handler returned an error"
                );
                let message = format!("tool `{}` failed: {failure}", request.name);
                ToolResult::failure(&request.id, message)
            }
            Ok(Err(join_error)) => {
                warn!(
                    event_name = "agent.tool.crashed",
                    tool_call_id = %request.id,
                    tool = %request.name,
                    error = %join_error,
                    "tool handler task did not complete"
                );
                ToolResult::failure(
                    &request.id,
                    format!("tool `{}` failed unexpectedly", request.name),
                )
            }
            Err(_) => {
                task.abort();
                warn!(
                    event_name = "agent.tool.timed_out",
                    tool_call_id = %request.id,
                    tool = %request.name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "tool handler exceeded its time budget"
                );
                ToolResult::failure(
                    &request.id,
                    format!(
                        "tool `{}` timed out after {}ms",
                        request.name,
                        self.timeout.as_millis()
                    ),
                )
            }
        }
    }

    /// Runs every request concurrently. Results keep the order of `requests`.
    pub async fn dispatch_all(&self, requests: &[ToolCallRequest]) -> Vec<ToolResult> {
        join_all(requests.iter().map(|request| self.dispatch(request))).await
    }
}

fn join_errors(errors: &[ArgumentError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
