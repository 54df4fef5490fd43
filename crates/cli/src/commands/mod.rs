pub mod config;
pub mod doctor;
pub mod smoke;
pub mod tools;

use std::sync::Arc;

use parley_agent::catalog::{
    register_builtin_tools, ChartRenderer, QueryBackend, UnconfiguredChartRenderer,
    UnconfiguredQueryBackend,
};
use parley_agent::tools::{RegistryError, ToolRegistry};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    })
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds the catalog the server registers, with the given collaborators.
fn builtin_registry(
    backend: Arc<dyn QueryBackend>,
    renderer: Arc<dyn ChartRenderer>,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::default();
    register_builtin_tools(&mut registry, backend, renderer)?;
    Ok(registry)
}

fn server_registry() -> Result<ToolRegistry, RegistryError> {
    builtin_registry(Arc::new(UnconfiguredQueryBackend), Arc::new(UnconfiguredChartRenderer))
}
