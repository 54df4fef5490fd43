mod bootstrap;

use anyhow::Result;
use parley_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;

    let filter = log_filter(&config.logging.level);
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);
    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

/// `RUST_LOG` directives win when present; otherwise the configured level applies.
fn log_filter(configured_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| configured_filter(configured_level))
}

fn configured_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_name = %app.config.assistant.bot_name,
        llm_provider = app.config.llm.provider.as_str(),
        tools = app.agent_runtime.tool_specs().len(),
        "parley-server started"
    );
    app.ingress_runner.start().await?;
    tracing::info!(
        event_name = "system.server.ingress_closed",
        correlation_id = "bootstrap",
        "chat transport closed; waiting for shutdown signal"
    );

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        sessions = app.agent_runtime.sessions().len(),
        "parley-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::configured_filter;

    #[test]
    fn configured_level_becomes_the_filter() {
        assert_eq!(configured_filter("warn").to_string(), "warn");
        assert_eq!(configured_filter("parley_agent=debug").to_string(), "parley_agent=debug");
    }

    #[test]
    fn unparseable_level_falls_back_to_info() {
        assert_eq!(configured_filter("parley=loud").to_string(), "info");
    }
}
