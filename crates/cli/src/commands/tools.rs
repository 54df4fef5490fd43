use serde_json::Value;

use crate::commands::{server_registry, CommandResult};

pub fn run() -> CommandResult {
    let registry = match server_registry() {
        Ok(registry) => registry,
        Err(error) => return CommandResult::failure("tools", "tool_catalog", error.to_string(), 4),
    };

    let schemas: Vec<Value> =
        registry.list_specs().iter().map(|spec| spec.to_json_schema()).collect();
    match serde_json::to_string_pretty(&schemas) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("tools", "serialization", error.to_string(), 4),
    }
}
