use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub assistant: AssistantConfig,
    pub llm: LlmConfig,
    pub orchestrator: OrchestratorConfig,
    pub ingress: IngressConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub bot_name: String,
    pub user_role: String,
    pub user_context: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Retry budget for provider HTTP clients. Reserved: no provider client ships in
    /// this workspace, so nothing reads it yet. `parley config` still reports it.
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_tool_rounds: u32,
    pub tool_timeout_secs: u64,
    pub max_transcript_messages: usize,
    pub dedupe_window: usize,
    pub dedupe_retain: usize,
}

#[derive(Clone, Debug)]
pub struct IngressConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub bot_name: Option<String>,
    pub max_tool_rounds: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            assistant: AssistantConfig {
                bot_name: "EIRANA".to_string(),
                user_role: "a growth analyst".to_string(),
                user_context: "the analytics team".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            orchestrator: OrchestratorConfig {
                max_tool_rounds: 5,
                tool_timeout_secs: 30,
                max_transcript_messages: 100,
                dedupe_window: 1000,
                dedupe_retain: 500,
            },
            ingress: IngressConfig { max_retries: 5, base_delay_ms: 250, max_delay_ms: 10_000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn is_hosted(self) -> bool {
        matches!(self, Self::OpenAi | Self::Anthropic)
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(assistant) = patch.assistant {
            assign(&mut self.assistant.bot_name, assistant.bot_name);
            assign(&mut self.assistant.user_role, assistant.user_role);
            assign(&mut self.assistant.user_context, assistant.user_context);
        }

        if let Some(llm) = patch.llm {
            assign(&mut self.llm.provider, llm.provider);
            assign(&mut self.llm.api_key, llm.api_key.map(|key| Some(secret_value(key))));
            assign(&mut self.llm.base_url, llm.base_url.map(Some));
            assign(&mut self.llm.model, llm.model);
            assign(&mut self.llm.timeout_secs, llm.timeout_secs);
            assign(&mut self.llm.max_retries, llm.max_retries);
        }

        if let Some(orchestrator) = patch.orchestrator {
            let target = &mut self.orchestrator;
            assign(&mut target.max_tool_rounds, orchestrator.max_tool_rounds);
            assign(&mut target.tool_timeout_secs, orchestrator.tool_timeout_secs);
            assign(&mut target.max_transcript_messages, orchestrator.max_transcript_messages);
            assign(&mut target.dedupe_window, orchestrator.dedupe_window);
            assign(&mut target.dedupe_retain, orchestrator.dedupe_retain);
        }

        if let Some(ingress) = patch.ingress {
            assign(&mut self.ingress.max_retries, ingress.max_retries);
            assign(&mut self.ingress.base_delay_ms, ingress.base_delay_ms);
            assign(&mut self.ingress.max_delay_ms, ingress.max_delay_ms);
        }

        if let Some(logging) = patch.logging {
            assign(&mut self.logging.level, logging.level);
            assign(&mut self.logging.format, logging.format);
        }
    }

    /// Applies `PARLEY_*` variables. The bare `BOT_NAME`, `USER_ROLE` and `USER_CONTEXT`
    /// names are accepted as fallbacks for existing deployments.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let assistant = &mut self.assistant;
        assign(&mut assistant.bot_name, env_text(&["PARLEY_ASSISTANT_BOT_NAME", "BOT_NAME"]));
        assign(&mut assistant.user_role, env_text(&["PARLEY_ASSISTANT_USER_ROLE", "USER_ROLE"]));
        assign(
            &mut assistant.user_context,
            env_text(&["PARLEY_ASSISTANT_USER_CONTEXT", "USER_CONTEXT"]),
        );

        if let Some(value) = env_text(&["PARLEY_LLM_PROVIDER"]) {
            self.llm.provider = value.parse()?;
        }
        let api_key = env_text(&["PARLEY_LLM_API_KEY"]);
        assign(&mut self.llm.api_key, api_key.map(|key| Some(secret_value(key))));
        assign(&mut self.llm.base_url, env_text(&["PARLEY_LLM_BASE_URL"]).map(Some));
        assign(&mut self.llm.model, env_text(&["PARLEY_LLM_MODEL"]));
        assign(&mut self.llm.timeout_secs, env_number("PARLEY_LLM_TIMEOUT_SECS")?);
        assign(&mut self.llm.max_retries, env_number("PARLEY_LLM_MAX_RETRIES")?);

        let orchestrator = &mut self.orchestrator;
        assign(
            &mut orchestrator.max_tool_rounds,
            env_number("PARLEY_ORCHESTRATOR_MAX_TOOL_ROUNDS")?,
        );
        assign(
            &mut orchestrator.tool_timeout_secs,
            env_number("PARLEY_ORCHESTRATOR_TOOL_TIMEOUT_SECS")?,
        );
        assign(
            &mut orchestrator.max_transcript_messages,
            env_number("PARLEY_ORCHESTRATOR_MAX_TRANSCRIPT_MESSAGES")?,
        );
        assign(&mut orchestrator.dedupe_window, env_number("PARLEY_ORCHESTRATOR_DEDUPE_WINDOW")?);
        assign(&mut orchestrator.dedupe_retain, env_number("PARLEY_ORCHESTRATOR_DEDUPE_RETAIN")?);

        assign(&mut self.ingress.max_retries, env_number("PARLEY_INGRESS_MAX_RETRIES")?);
        assign(&mut self.ingress.base_delay_ms, env_number("PARLEY_INGRESS_BASE_DELAY_MS")?);
        assign(&mut self.ingress.max_delay_ms, env_number("PARLEY_INGRESS_MAX_DELAY_MS")?);

        assign(&mut self.logging.level, env_text(&["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"]));
        if let Some(value) = env_text(&["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"]) {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        assign(&mut self.logging.level, overrides.log_level);
        assign(&mut self.llm.provider, overrides.llm_provider);
        assign(&mut self.llm.model, overrides.llm_model);
        assign(&mut self.assistant.bot_name, overrides.bot_name);
        assign(&mut self.orchestrator.max_tool_rounds, overrides.max_tool_rounds);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_assistant(&self.assistant)?;
        validate_llm(&self.llm)?;
        validate_orchestrator(&self.orchestrator)?;
        validate_ingress(&self.ingress)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_assistant(assistant: &AssistantConfig) -> Result<(), ConfigError> {
    if assistant.bot_name.trim().is_empty() {
        return Err(ConfigError::Validation("assistant.bot_name must not be empty".to_string()));
    }
    if assistant.user_role.trim().is_empty() {
        return Err(ConfigError::Validation("assistant.user_role must not be empty".to_string()));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_orchestrator(orchestrator: &OrchestratorConfig) -> Result<(), ConfigError> {
    if orchestrator.max_tool_rounds == 0 || orchestrator.max_tool_rounds > 50 {
        return Err(ConfigError::Validation(
            "orchestrator.max_tool_rounds must be in range 1..=50".to_string(),
        ));
    }

    if orchestrator.tool_timeout_secs == 0 || orchestrator.tool_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "orchestrator.tool_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if orchestrator.max_transcript_messages < 2 {
        return Err(ConfigError::Validation(
            "orchestrator.max_transcript_messages must be at least 2".to_string(),
        ));
    }

    if orchestrator.dedupe_window == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.dedupe_window must be greater than zero".to_string(),
        ));
    }

    if orchestrator.dedupe_retain == 0 || orchestrator.dedupe_retain > orchestrator.dedupe_window
    {
        return Err(ConfigError::Validation(
            "orchestrator.dedupe_retain must be in range 1..=orchestrator.dedupe_window"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_ingress(ingress: &IngressConfig) -> Result<(), ConfigError> {
    if ingress.base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "ingress.base_delay_ms must be greater than zero".to_string(),
        ));
    }

    if ingress.max_delay_ms < ingress.base_delay_ms {
        return Err(ConfigError::Validation(
            "ingress.max_delay_ms must not be lower than ingress.base_delay_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn assign<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// First non-blank value among `keys`.
fn env_text(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
}

fn env_number<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    let Some(value) = env_text(&[key]) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    parsed.map(Some).map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    assistant: Option<AssistantPatch>,
    llm: Option<LlmPatch>,
    orchestrator: Option<OrchestratorPatch>,
    ingress: Option<IngressPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantPatch {
    bot_name: Option<String>,
    user_role: Option<String>,
    user_context: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    max_tool_rounds: Option<u32>,
    tool_timeout_secs: Option<u64>,
    max_transcript_messages: Option<usize>,
    dedupe_window: Option<usize>,
    dedupe_retain: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct IngressPatch {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
