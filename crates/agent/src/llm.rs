use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::config::LlmProvider;
use parley_core::{Message, ToolCallRequest};
use thiserror::Error;

use crate::schema::ToolSpec;

/// What the model wants next: a final answer, or tools to run first.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelResponse {
    FinalText(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("model transport failure: {0}")]
    Transport(String),
    #[error("model provider rejected credentials: {0}")]
    Authentication(String),
    #[error("model provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("model call did not finish within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("model returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "provider_transport",
            Self::Authentication(_) => "provider_authentication",
            Self::RateLimited { .. } => "provider_rate_limited",
            Self::Timeout { .. } => "provider_timeout",
            Self::MalformedResponse(_) => "provider_malformed_response",
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ProviderError>;
}

/// Stand-in used when no provider client is linked into the process. Every call
/// fails, so users get the generic failure reply instead of silence.
#[derive(Clone, Copy, Debug)]
pub struct UnconfiguredLlmClient {
    provider: LlmProvider,
}

impl UnconfiguredLlmClient {
    pub fn new(provider: LlmProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl LlmClient for UnconfiguredLlmClient {
    async fn complete(
        &self,
        _history: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse, ProviderError> {
        Err(ProviderError::Transport(format!(
            "no `{}` client is linked into this build",
            self.provider.as_str()
        )))
    }
}

/// Replays a fixed sequence of responses and records every history it was shown.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = Result<ModelResponse, ProviderError>>) -> Self {
        Self { script: Mutex::new(script.into_iter().collect()), seen: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        match self.seen.lock() {
            Ok(seen) => seen.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        history: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse, ProviderError> {
        match self.seen.lock() {
            Ok(mut seen) => seen.push(history.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(history.to_vec()),
        }

        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| {
            Err(ProviderError::MalformedResponse("scripted responses exhausted".to_owned()))
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_core::config::LlmProvider;
    use parley_core::Message;

    use super::{LlmClient, ModelResponse, ProviderError, ScriptedLlmClient, UnconfiguredLlmClient};

    #[tokio::test]
    async fn scripted_client_replays_in_order_then_reports_exhaustion() {
        let client = ScriptedLlmClient::new(vec![
            Ok(ModelResponse::FinalText("first".to_owned())),
            Err(ProviderError::RateLimited { retry_after_secs: Some(3) }),
        ]);
        let history = vec![Message::user("hello")];

        assert_eq!(
            client.complete(&history, &[]).await,
            Ok(ModelResponse::FinalText("first".to_owned()))
        );
        assert_eq!(
            client.complete(&history, &[]).await,
            Err(ProviderError::RateLimited { retry_after_secs: Some(3) })
        );
        assert!(matches!(
            client.complete(&history, &[]).await,
            Err(ProviderError::MalformedResponse(_))
        ));
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.histories()[0], history);
    }

    #[tokio::test]
    async fn unconfigured_client_names_the_provider() {
        let client = UnconfiguredLlmClient::new(LlmProvider::Anthropic);
        let error = client.complete(&[], &[]).await.err();

        assert!(matches!(
            error,
            Some(ProviderError::Transport(ref message)) if message.contains("anthropic")
        ));
        assert_eq!(
            error.map(|error| error.reason_code()),
            Some("provider_transport")
        );
    }
}
