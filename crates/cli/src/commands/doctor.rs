use parley_agent::session::SessionSettings;
use parley_core::config::{AppConfig, LlmProvider, LoadOptions};
use serde::Serialize;

use crate::commands::{escape_json, server_registry, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 2] = ["llm_credentials", "session_settings"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 3 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_credentials(&config));
            checks.push(check_session_settings(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }
    checks.push(check_tool_catalog());

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let llm = &config.llm;
    let details = match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            format!("api key present for `{}` (model `{}`)", llm.provider.as_str(), llm.model)
        }
        LlmProvider::Ollama => format!(
            "local endpoint `{}` (model `{}`)",
            llm.base_url.as_deref().unwrap_or("<unset>"),
            llm.model
        ),
    };
    DoctorCheck { name: "llm_credentials", status: CheckStatus::Pass, details }
}

fn check_session_settings(config: &AppConfig) -> DoctorCheck {
    let settings = SessionSettings::from(&config.orchestrator);
    DoctorCheck {
        name: "session_settings",
        status: CheckStatus::Pass,
        details: format!(
            "transcript cap {} messages, dedupe window {} (retain {}), max {} tool rounds",
            settings.max_transcript_messages,
            settings.dedupe_window,
            settings.dedupe_retain,
            config.orchestrator.max_tool_rounds
        ),
    }
}

fn check_tool_catalog() -> DoctorCheck {
    let registry = match server_registry() {
        Ok(registry) => registry,
        Err(error) => {
            return DoctorCheck {
                name: "tool_catalog",
                status: CheckStatus::Fail,
                details: error.to_string(),
            }
        }
    };

    let malformed: Vec<&str> = registry
        .list_specs()
        .iter()
        .filter(|spec| spec.to_json_schema()["function"]["name"] != spec.name.as_str())
        .map(|spec| spec.name.as_str())
        .collect();
    if !malformed.is_empty() {
        return DoctorCheck {
            name: "tool_catalog",
            status: CheckStatus::Fail,
            details: format!("schema rendering failed for: {}", malformed.join(", ")),
        };
    }

    DoctorCheck {
        name: "tool_catalog",
        status: CheckStatus::Pass,
        details: format!("{} tools registered: {}", registry.len(), registry.names().join(", ")),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
