use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parley_agent::catalog::{ChartRenderer, ChartRequest, QueryBackend, QueryRows};
use parley_agent::guardrails::GuardrailPolicy;
use parley_agent::llm::{ModelResponse, ScriptedLlmClient};
use parley_agent::session::{SessionSettings, SessionStore};
use parley_agent::tools::{ToolFailure, ToolRegistry};
use parley_agent::{AgentRuntime, TurnReply, TurnStatus};
use parley_core::config::{AppConfig, LoadOptions};
use parley_core::prompt::render_system_prompt;
use parley_core::{ToolArguments, ToolCallRequest};
use serde::Serialize;
use serde_json::{json, Value};

use crate::commands::{builtin_registry, escape_json, CommandResult};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const SMOKE_USER: &str = "U-smoke";
const SMOKE_CHANNEL: &str = "C-smoke";
const SMOKE_EVENT: &str = "Ev-smoke-1";
const SMOKE_QUESTION: &str = "EIRANA show sales by region as a bar chart";
const SMOKE_ANSWER: &str = "Here is your chart";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

struct SmokeWarehouse;

#[async_trait]
impl QueryBackend for SmokeWarehouse {
    async fn run_query(&self, _sql: &str) -> Result<QueryRows, ToolFailure> {
        Ok(QueryRows {
            columns: vec!["region".to_string(), "sales".to_string()],
            rows: vec![vec![json!("North"), json!(120)], vec![json!("South"), json!(95)]],
        })
    }

    async fn distinct_values(
        &self,
        _column: &str,
        _table: &str,
    ) -> Result<Vec<String>, ToolFailure> {
        Ok(Vec::new())
    }
}

struct SmokeRenderer;

#[async_trait]
impl ChartRenderer for SmokeRenderer {
    async fn render(&self, _request: &ChartRequest) -> Result<Vec<u8>, ToolFailure> {
        Ok(PNG_SIGNATURE.to_vec())
    }
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("catalog_registration"));
            checks.push(skipped("scripted_conversation"));
            checks.push(skipped("duplicate_suppression"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let registry = match timed_check(|| {
        builtin_registry(Arc::new(SmokeWarehouse), Arc::new(SmokeRenderer))
    }) {
        Ok((elapsed_ms, registry)) => {
            checks.push(SmokeCheck {
                name: "catalog_registration",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: format!("{} tools registered", registry.len()),
            });
            registry
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "catalog_registration",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("scripted_conversation"));
            checks.push(skipped("duplicate_suppression"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let async_runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "scripted_conversation",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("duplicate_suppression"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(ModelResponse::ToolCalls(vec![bar_chart_call()])),
        Ok(ModelResponse::FinalText(SMOKE_ANSWER.to_string())),
    ]));
    let agent = build_agent(&config, registry, Arc::clone(&llm));

    let conversation_started = Instant::now();
    let reply = async_runtime.block_on(agent.handle_inbound_message(
        SMOKE_USER,
        SMOKE_CHANNEL,
        SMOKE_EVENT,
        SMOKE_QUESTION,
    ));
    let conversation_problem = check_conversation(&reply);
    checks.push(SmokeCheck {
        name: "scripted_conversation",
        status: if conversation_problem.is_none() { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed_since(conversation_started),
        message: conversation_problem.unwrap_or_else(|| {
            format!(
                "bar chart answered after {} tool round(s) with {} attachment(s)",
                reply.tool_rounds,
                reply.attachments.len()
            )
        }),
    });
    if checks.iter().any(|check| check.status == SmokeStatus::Fail) {
        checks.push(skipped("duplicate_suppression"));
        return finalize_report(checks, elapsed_since(started));
    }

    let duplicate_started = Instant::now();
    let redelivered = async_runtime.block_on(agent.handle_inbound_message(
        SMOKE_USER,
        SMOKE_CHANNEL,
        SMOKE_EVENT,
        SMOKE_QUESTION,
    ));
    let suppressed = redelivered.status == TurnStatus::Duplicate && llm.call_count() == 2;
    checks.push(SmokeCheck {
        name: "duplicate_suppression",
        status: if suppressed { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed_since(duplicate_started),
        message: if suppressed {
            "redelivered event was dropped without a model call".to_string()
        } else {
            format!(
                "expected a silent duplicate, got {:?} after {} model call(s)",
                redelivered.status,
                llm.call_count()
            )
        },
    });

    finalize_report(checks, elapsed_since(started))
}

fn build_agent(
    config: &AppConfig,
    registry: ToolRegistry,
    llm: Arc<ScriptedLlmClient>,
) -> AgentRuntime {
    let sessions = Arc::new(SessionStore::new(
        render_system_prompt(&config.assistant),
        SessionSettings::from(&config.orchestrator),
    ));
    AgentRuntime::new(llm, Arc::new(registry), sessions, GuardrailPolicy::from_config(config))
}

fn bar_chart_call() -> ToolCallRequest {
    let arguments = match json!({
        "categories": ["North", "South"],
        "values": [120, 95],
        "title": "Sales by Region",
        "x_label": "Region",
        "y_label": "Sales",
        "palette_type": "CATEGORICAL",
        "value_type": "CURRENCY",
    }) {
        Value::Object(map) => map,
        _ => ToolArguments::new(),
    };
    ToolCallRequest::new("call_smoke_chart", "create_bar_chart", arguments)
}

/// Returns a description of the first mismatch, if any.
fn check_conversation(reply: &TurnReply) -> Option<String> {
    if reply.status != TurnStatus::Answered {
        return Some(format!("expected an answered turn, got {:?}: {}", reply.status, reply.text));
    }
    if reply.text != SMOKE_ANSWER {
        return Some(format!("unexpected reply text `{}`", reply.text));
    }
    if reply.tool_rounds != 1 {
        return Some(format!("expected 1 tool round, got {}", reply.tool_rounds));
    }
    match reply.attachments.as_slice() {
        [chart] if chart.data.starts_with(&PNG_SIGNATURE) => None,
        attachments => Some(format!("expected one PNG attachment, got {}", attachments.len())),
    }
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due to previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\
             \"error\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
