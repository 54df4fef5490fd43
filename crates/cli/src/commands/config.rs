use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use toml::Value;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ConfigField {
    key: &'static str,
    value: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    command: &'static str,
    status: &'static str,
    precedence: &'static str,
    fields: Vec<ConfigField>,
}

pub fn run(json_output: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let fields = effective_fields(&config)
        .into_iter()
        .map(|(key, value, env_keys)| ConfigField {
            key,
            value,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect::<Vec<_>>();

    let report = ConfigReport {
        command: "config",
        status: "ok",
        precedence: "env > file > default",
        fields,
    };

    if json_output {
        return match serde_json::to_string_pretty(&report) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("config", "serialization", error.to_string(), 2),
        };
    }

    let mut lines = vec![format!("effective config (source precedence: {}):", report.precedence)];
    lines.extend(report.fields.iter().map(render_line));
    CommandResult { exit_code: 0, output: lines.join("\n") }
}

type FieldRow = (&'static str, String, &'static [&'static str]);

fn effective_fields(config: &AppConfig) -> Vec<FieldRow> {
    let assistant = &config.assistant;
    let llm = &config.llm;
    let orchestrator = &config.orchestrator;
    let ingress = &config.ingress;
    let logging = &config.logging;

    vec![
        row(
            "assistant.bot_name",
            assistant.bot_name.clone(),
            &["PARLEY_ASSISTANT_BOT_NAME", "BOT_NAME"],
        ),
        row(
            "assistant.user_role",
            assistant.user_role.clone(),
            &["PARLEY_ASSISTANT_USER_ROLE", "USER_ROLE"],
        ),
        row(
            "assistant.user_context",
            assistant.user_context.clone(),
            &["PARLEY_ASSISTANT_USER_CONTEXT", "USER_CONTEXT"],
        ),
        row("llm.provider", llm.provider.as_str().to_string(), &["PARLEY_LLM_PROVIDER"]),
        row("llm.model", llm.model.clone(), &["PARLEY_LLM_MODEL"]),
        row(
            "llm.base_url",
            llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["PARLEY_LLM_BASE_URL"],
        ),
        row("llm.api_key", redact_secret(llm.api_key.as_ref()), &["PARLEY_LLM_API_KEY"]),
        row("llm.timeout_secs", llm.timeout_secs.to_string(), &["PARLEY_LLM_TIMEOUT_SECS"]),
        row("llm.max_retries", llm.max_retries.to_string(), &["PARLEY_LLM_MAX_RETRIES"]),
        row(
            "orchestrator.max_tool_rounds",
            orchestrator.max_tool_rounds.to_string(),
            &["PARLEY_ORCHESTRATOR_MAX_TOOL_ROUNDS"],
        ),
        row(
            "orchestrator.tool_timeout_secs",
            orchestrator.tool_timeout_secs.to_string(),
            &["PARLEY_ORCHESTRATOR_TOOL_TIMEOUT_SECS"],
        ),
        row(
            "orchestrator.max_transcript_messages",
            orchestrator.max_transcript_messages.to_string(),
            &["PARLEY_ORCHESTRATOR_MAX_TRANSCRIPT_MESSAGES"],
        ),
        row(
            "orchestrator.dedupe_window",
            orchestrator.dedupe_window.to_string(),
            &["PARLEY_ORCHESTRATOR_DEDUPE_WINDOW"],
        ),
        row(
            "orchestrator.dedupe_retain",
            orchestrator.dedupe_retain.to_string(),
            &["PARLEY_ORCHESTRATOR_DEDUPE_RETAIN"],
        ),
        row(
            "ingress.max_retries",
            ingress.max_retries.to_string(),
            &["PARLEY_INGRESS_MAX_RETRIES"],
        ),
        row(
            "ingress.base_delay_ms",
            ingress.base_delay_ms.to_string(),
            &["PARLEY_INGRESS_BASE_DELAY_MS"],
        ),
        row(
            "ingress.max_delay_ms",
            ingress.max_delay_ms.to_string(),
            &["PARLEY_INGRESS_MAX_DELAY_MS"],
        ),
        row(
            "logging.level",
            logging.level.clone(),
            &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
        ),
        row(
            "logging.format",
            format!("{:?}", logging.format).to_lowercase(),
            &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
        ),
    ]
}

fn row(key: &'static str, value: String, env_keys: &'static [&'static str]) -> FieldRow {
    (key, value, env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("parley.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/parley.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(field: &ConfigField) -> String {
    format!("- {} = {} (source: {})", field.key, field.value, field.source)
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
