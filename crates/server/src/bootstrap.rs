use std::sync::Arc;

use parley_agent::{
    catalog::{register_builtin_tools, UnconfiguredChartRenderer, UnconfiguredQueryBackend},
    guardrails::GuardrailPolicy,
    llm::UnconfiguredLlmClient,
    runtime::AgentRuntime,
    session::{SessionSettings, SessionStore},
    tools::{RegistryError, ToolRegistry},
};
use parley_core::config::{AppConfig, ConfigError};
use parley_core::prompt::render_system_prompt;
use parley_core::TracingAuditSink;
use parley_ingress::{
    events::mention_dispatcher,
    socket::{NoopChatTransport, ReconnectPolicy, SocketModeRunner},
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub agent_runtime: Arc<AgentRuntime>,
    pub ingress_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tool catalog registration failed: {0}")]
    ToolCatalog(#[from] RegistryError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let mut registry = ToolRegistry::default();
    register_builtin_tools(
        &mut registry,
        Arc::new(UnconfiguredQueryBackend),
        Arc::new(UnconfiguredChartRenderer),
    )?;
    info!(
        event_name = "system.bootstrap.tools_registered",
        correlation_id = "bootstrap",
        tools = registry.len(),
        "tool catalog registered"
    );

    let sessions = SessionStore::new(
        render_system_prompt(&config.assistant),
        SessionSettings::from(&config.orchestrator),
    );
    let agent_runtime = Arc::new(
        AgentRuntime::new(
            Arc::new(UnconfiguredLlmClient::new(config.llm.provider)),
            Arc::new(registry),
            Arc::new(sessions),
            GuardrailPolicy::from_config(&config),
        )
        .with_audit_sink(Arc::new(TracingAuditSink)),
    );

    let ingress_runner = SocketModeRunner::new(
        Arc::new(NoopChatTransport),
        mention_dispatcher(Arc::clone(&agent_runtime), config.assistant.bot_name.clone()),
        ReconnectPolicy::from(&config.ingress),
    );
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "application bootstrap complete"
    );

    Ok(Application { config, agent_runtime, ingress_runner })
}
