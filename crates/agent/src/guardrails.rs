use std::time::Duration;

use parley_core::config::AppConfig;

use crate::llm::ProviderError;

pub const CLARIFICATION_MESSAGE: &str = "I'm sorry, I couldn't understand the query clearly. \
Could you please rephrase or provide more details about what you're looking for?";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => {
                Some(*reason_code)
            }
        }
    }
}

/// Bounds on a single orchestration turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_tool_rounds: u32,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            model_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

impl GuardrailPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_tool_rounds: config.orchestrator.max_tool_rounds,
            model_timeout: Duration::from_secs(config.llm.timeout_secs),
            tool_timeout: Duration::from_secs(config.orchestrator.tool_timeout_secs),
        }
    }

    /// Decides whether another round of tool calls may run after `completed_rounds`.
    pub fn evaluate_round(&self, completed_rounds: u32) -> GuardrailDecision {
        if completed_rounds < self.max_tool_rounds {
            return GuardrailDecision::Allow;
        }

        GuardrailDecision::Deny {
            reason_code: "round_limit_exceeded",
            user_message: format!(
                "I reached the limit of {} tool-call rounds before finishing an answer. \
                 Please narrow the question or split it into smaller steps.",
                self.max_tool_rounds
            ),
            fallback_path: "ask_user_to_narrow",
        }
    }

    pub fn provider_failure(&self, error: &ProviderError) -> GuardrailDecision {
        GuardrailDecision::Degrade {
            reason_code: error.reason_code(),
            user_message: CLARIFICATION_MESSAGE.to_string(),
            fallback_path: "ask_user_to_rephrase",
        }
    }
}
