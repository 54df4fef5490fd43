use std::collections::HashSet;
use std::sync::Arc;

use parley_core::{
    verify_tool_correlation, Attachment, AuditCategory, AuditEvent, AuditOutcome, AuditSink,
    Message, SessionKey, ToolCallRequest, TracingAuditSink,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher::ToolDispatcher;
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{LlmClient, ModelResponse, ProviderError};
use crate::schema::ToolSpec;
use crate::session::{Session, SessionStore};
use crate::tools::ToolRegistry;

const ACTOR: &str = "agent-runtime";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Answered,
    Duplicate,
    RoundLimitExceeded,
    ProviderFailed,
}

/// Outcome of one inbound message. `text` is what the adapter posts back; a
/// duplicate delivery has no text and nothing should be posted for it.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    pub status: TurnStatus,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub tool_rounds: u32,
}

impl TurnReply {
    fn duplicate() -> Self {
        Self {
            status: TurnStatus::Duplicate,
            text: String::new(),
            attachments: Vec::new(),
            tool_rounds: 0,
        }
    }

    pub fn should_post(&self) -> bool {
        self.status != TurnStatus::Duplicate
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    dispatcher: ToolDispatcher,
    sessions: Arc<SessionStore>,
    guardrails: GuardrailPolicy,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        guardrails: GuardrailPolicy,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(registry, guardrails.tool_timeout);
        Self { llm, dispatcher, sessions, guardrails, audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        self.dispatcher.registry().list_specs()
    }

    /// Runs one user message through the model/tool loop and returns the reply.
    /// The session stays locked for the whole turn, so deliveries for the same
    /// user and channel are processed one at a time.
    pub async fn handle_inbound_message(
        &self,
        user_id: &str,
        channel_id: &str,
        event_id: &str,
        text: &str,
    ) -> TurnReply {
        let key = SessionKey::new(user_id, channel_id);
        let handle = self.sessions.get_or_create(&key);
        let mut session = handle.lock().await;

        if self.sessions.is_duplicate(&mut session, event_id) {
            info!(
                event_name = "agent.turn.duplicate",
                correlation_id = %event_id,
                session = %key,
                "suppressed duplicate event delivery"
            );
            self.record(
                &key,
                event_id,
                "agent.turn.duplicate",
                AuditCategory::Session,
                AuditOutcome::Rejected,
                &[],
            );
            return TurnReply::duplicate();
        }

        info!(
            event_name = "agent.turn.started",
            correlation_id = %event_id,
            session = %key,
            "processing inbound message"
        );
        self.record(
            &key,
            event_id,
            "agent.turn.started",
            AuditCategory::Orchestrator,
            AuditOutcome::Success,
            &[],
        );

        self.sessions.append(&mut session, Message::user(text));
        let reply = self.run_loop(&mut session, &key, event_id).await;

        if let Err(violation) = verify_tool_correlation(self.sessions.history(&session)) {
            error!(
                event_name = "agent.turn.transcript_invalid",
                correlation_id = %event_id,
                session = %key,
                error = %violation,
                "transcript failed tool correlation check"
            );
            self.record(
                &key,
                event_id,
                "agent.turn.transcript_invalid",
                AuditCategory::Orchestrator,
                AuditOutcome::Failed,
                &[("error", violation.to_string())],
            );
        }
        self.sessions.enforce_retention(&mut session);

        self.record(
            &key,
            event_id,
            "agent.turn.completed",
            AuditCategory::Orchestrator,
            outcome_for(reply.status),
            &[
                ("status", format!("{:?}", reply.status)),
                ("tool_rounds", reply.tool_rounds.to_string()),
            ],
        );
        reply
    }

    async fn run_loop(&self, session: &mut Session, key: &SessionKey, event_id: &str) -> TurnReply {
        let mut tool_rounds = 0;
        let mut attachments = Vec::new();

        loop {
            let response = self.call_model(self.sessions.history(session)).await;
            let response = match response {
                Ok(response) => response,
                Err(provider_error) => {
                    warn!(
                        event_name = "agent.model.failed",
                        correlation_id = %event_id,
                        session = %key,
                        error = %provider_error,
                        "model call failed; ending turn"
                    );
                    let decision = self.guardrails.provider_failure(&provider_error);
                    self.record(
                        key,
                        event_id,
                        "agent.model.failed",
                        AuditCategory::Model,
                        AuditOutcome::Failed,
                        &[
                            ("reason_code", provider_error.reason_code().to_owned()),
                            ("error", provider_error.to_string()),
                        ],
                    );
                    let text = match decision {
                        GuardrailDecision::Degrade { user_message, .. }
                        | GuardrailDecision::Deny { user_message, .. } => user_message,
                        GuardrailDecision::Allow => provider_error.to_string(),
                    };
                    return self.finish(
                        session,
                        TurnStatus::ProviderFailed,
                        text,
                        attachments,
                        tool_rounds,
                    );
                }
            };

            let (response_kind, call_count) = match &response {
                ModelResponse::FinalText(_) => ("final_text", 0),
                ModelResponse::ToolCalls(calls) => ("tool_calls", calls.len()),
            };
            self.record(
                key,
                event_id,
                "agent.model.called",
                AuditCategory::Model,
                AuditOutcome::Success,
                &[
                    ("response_kind", response_kind.to_owned()),
                    ("tool_calls", call_count.to_string()),
                ],
            );

            match response {
                ModelResponse::FinalText(text) => {
                    return self.finish(
                        session,
                        TurnStatus::Answered,
                        text,
                        attachments,
                        tool_rounds,
                    );
                }
                ModelResponse::ToolCalls(calls) => {
                    if let GuardrailDecision::Deny { user_message, reason_code, .. } =
                        self.guardrails.evaluate_round(tool_rounds)
                    {
                        warn!(
                            event_name = "agent.turn.round_limit",
                            correlation_id = %event_id,
                            session = %key,
                            tool_rounds,
                            "model kept requesting tools past the round limit"
                        );
                        self.record(
                            key,
                            event_id,
                            "agent.turn.round_limit",
                            AuditCategory::Orchestrator,
                            AuditOutcome::Rejected,
                            &[("reason_code", reason_code.to_owned())],
                        );
                        return self.finish(
                            session,
                            TurnStatus::RoundLimitExceeded,
                            user_message,
                            attachments,
                            tool_rounds,
                        );
                    }

                    // The request group is appended only once every result is in hand,
                    // so a turn cancelled mid-dispatch leaves no unanswered calls behind.
                    let calls = assign_missing_ids(calls);
                    let results = self.dispatcher.dispatch_all(&calls).await;
                    self.sessions.append(session, Message::assistant_tool_calls(calls.clone()));
                    for (call, result) in calls.iter().zip(results) {
                        let outcome = if result.is_error {
                            AuditOutcome::Failed
                        } else {
                            AuditOutcome::Success
                        };
                        self.record(
                            key,
                            event_id,
                            "agent.tool.dispatched",
                            AuditCategory::Tool,
                            outcome,
                            &[("tool", call.name.clone()), ("tool_call_id", call.id.clone())],
                        );
                        attachments.extend(result.attachments.iter().cloned());
                        self.sessions.append(session, Message::tool(&result));
                    }
                    tool_rounds += 1;
                }
            }
        }
    }

    async fn call_model(&self, history: &[Message]) -> Result<ModelResponse, ProviderError> {
        let call = self.llm.complete(history, self.tool_specs());
        match tokio::time::timeout(self.guardrails.model_timeout, call).await {
            Err(_) => Err(ProviderError::Timeout {
                timeout_secs: self.guardrails.model_timeout.as_secs(),
            }),
            Ok(Ok(ModelResponse::ToolCalls(calls))) if calls.is_empty() => Err(
                ProviderError::MalformedResponse("tool call response had no calls".to_owned()),
            ),
            Ok(result) => result,
        }
    }

    fn finish(
        &self,
        session: &mut Session,
        status: TurnStatus,
        text: String,
        attachments: Vec<Attachment>,
        tool_rounds: u32,
    ) -> TurnReply {
        self.sessions.append(session, Message::assistant(text.clone()));
        TurnReply { status, text, attachments, tool_rounds }
    }

    fn record(
        &self,
        key: &SessionKey,
        event_id: &str,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let event = metadata.iter().fold(
            AuditEvent::new(Some(key.clone()), event_id, event_type, category, ACTOR, outcome),
            |event, (name, value)| event.with_metadata(*name, value.clone()),
        );
        self.audit.emit(event);
    }
}

fn outcome_for(status: TurnStatus) -> AuditOutcome {
    match status {
        TurnStatus::Answered => AuditOutcome::Success,
        TurnStatus::Duplicate | TurnStatus::RoundLimitExceeded => AuditOutcome::Rejected,
        TurnStatus::ProviderFailed => AuditOutcome::Failed,
    }
}

/// Gives every call a usable id: blank or repeated ids get a fresh `call_<uuid>`.
fn assign_missing_ids(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
                call.id = format!("call_{}", Uuid::new_v4().simple());
                seen.insert(call.id.clone());
            }
            call
        })
        .collect()
}
