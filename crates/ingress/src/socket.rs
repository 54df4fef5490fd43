use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use parley_core::config::IngressConfig;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::events::{
    ChatEnvelope, ChatEvent, EventContext, EventDispatcher, HandlerResult, OutboundReply,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport post failed: {0}")]
    Post(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 10_000 }
    }
}

impl From<&IngressConfig> for ReconnectPolicy {
    fn from(config: &IngressConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn post_reply(&self, reply: &OutboundReply) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Transport with no platform behind it: connects, yields nothing, closes.
#[derive(Default)]
pub struct NoopChatTransport;

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn post_reply(&self, _reply: &OutboundReply) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct SocketModeRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), reconnect_policy }
    }

    /// Pumps envelopes until the transport closes. Transport failures reconnect with
    /// exponential backoff; the retry budget resets after every successful connect, and
    /// once it runs out the runner returns without crashing.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            info!(attempt, "opening chat transport connection");
            let outcome = match self.transport.connect().await {
                Ok(()) => {
                    attempt = 0;
                    info!("chat transport connected");
                    self.pump().await
                }
                Err(error) => Err(error),
            };

            let Err(transport_error) = outcome else {
                return Ok(());
            };
            warn!(
                event_name = "ingress.transport.failed",
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %transport_error,
                "chat transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    event_name = "ingress.transport.retries_exhausted",
                    max_retries = self.reconnect_policy.max_retries,
                    "chat transport retries exhausted; continuing process without crash"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// Acknowledges envelopes in arrival order and handles each one on its own task,
    /// so a slow turn for one session never holds up another. In-flight turns are
    /// drained before the connection is closed or retried.
    async fn pump(&self) -> Result<(), TransportError> {
        let mut in_flight = JoinSet::new();
        let outcome = loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_failure(joined);
            }

            let envelope = match self.transport.next_envelope().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!("chat transport stream closed");
                    break Ok(());
                }
                Err(error) => break Err(error),
            };
            let (event_id, channel_id) = correlation_fields(&envelope);

            info!(
                event_name = "ingress.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                event_id = event_id.unwrap_or("unknown"),
                channel_id = channel_id.unwrap_or("unknown"),
                "received chat envelope"
            );

            match self.transport.acknowledge(&envelope.envelope_id).await {
                Ok(()) => debug!(
                    event_name = "ingress.ack_sent",
                    correlation_id = %envelope.envelope_id,
                    "acknowledged chat envelope"
                ),
                Err(error) => warn!(
                    event_name = "ingress.ack_failed",
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge chat envelope"
                ),
            }

            in_flight.spawn(handle_envelope(
                Arc::clone(&self.transport),
                Arc::clone(&self.dispatcher),
                envelope,
            ));
        };

        while let Some(joined) = in_flight.join_next().await {
            log_join_failure(joined);
        }
        if outcome.is_ok() {
            self.transport.disconnect().await?;
        }
        outcome
    }
}

async fn handle_envelope(
    transport: Arc<dyn ChatTransport>,
    dispatcher: Arc<EventDispatcher>,
    envelope: ChatEnvelope,
) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(reply)) => match transport.post_reply(&reply).await {
            Ok(()) => info!(
                event_name = "ingress.reply_posted",
                correlation_id = %context.correlation_id,
                channel_id = %reply.channel_id,
                attachments = reply.attachments.len(),
                "posted reply"
            ),
            Err(error) => warn!(
                event_name = "ingress.reply_failed",
                correlation_id = %context.correlation_id,
                channel_id = %reply.channel_id,
                error = %error,
                "failed to post reply"
            ),
        },
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
        Err(error) => warn!(
            event_name = "ingress.dispatch_failed",
            correlation_id = %context.correlation_id,
            error = %error,
            "event dispatch failed"
        ),
    }
}

fn log_join_failure(joined: Result<(), JoinError>) {
    if let Err(error) = joined {
        warn!(
            event_name = "ingress.handler_task_failed",
            error = %error,
            "envelope handler task did not complete"
        );
    }
}

fn correlation_fields(envelope: &ChatEnvelope) -> (Option<&str>, Option<&str>) {
    match &envelope.event {
        ChatEvent::Mention(event) => {
            (Some(event.event_id.as_str()), Some(event.channel_id.as_str()))
        }
        ChatEvent::Unsupported { .. } => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_agent::{TurnReply, TurnStatus};
    use parley_core::config::IngressConfig;
    use tokio::sync::Mutex;

    use super::{ChatTransport, ReconnectPolicy, SocketModeRunner, TransportError};
    use crate::events::{
        mention_dispatcher, ChatEnvelope, ChatEvent, ConversationService, EventDispatcher,
        EventHandlerError, MentionEvent, OutboundReply,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        posted: Vec<OutboundReply>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn post_reply(&self, reply: &OutboundReply) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.posted.push(reply.clone());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    struct OnceOnly;

    #[async_trait]
    impl ConversationService for OnceOnly {
        async fn converse(
            &self,
            _user_id: &str,
            _channel_id: &str,
            event_id: &str,
            _text: &str,
        ) -> Result<TurnReply, EventHandlerError> {
            let status =
                if event_id == "Ev-dup" { TurnStatus::Duplicate } else { TurnStatus::Answered };
            Ok(TurnReply {
                status,
                text: format!("answer for {event_id}"),
                attachments: Vec::new(),
                tool_rounds: 0,
            })
        }
    }

    /// Answers every user immediately except `U-slow`, whose turns take a while.
    struct SlowForOneUser;

    #[async_trait]
    impl ConversationService for SlowForOneUser {
        async fn converse(
            &self,
            user_id: &str,
            _channel_id: &str,
            _event_id: &str,
            _text: &str,
        ) -> Result<TurnReply, EventHandlerError> {
            if user_id == "U-slow" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            Ok(TurnReply {
                status: TurnStatus::Answered,
                text: format!("answer for {user_id}"),
                attachments: Vec::new(),
                tool_rounds: 1,
            })
        }
    }

    fn mention(envelope_id: &str, event_id: &str) -> ChatEnvelope {
        mention_from("U1", envelope_id, event_id)
    }

    fn mention_from(user_id: &str, envelope_id: &str, event_id: &str) -> ChatEnvelope {
        ChatEnvelope {
            envelope_id: envelope_id.to_owned(),
            event: ChatEvent::Mention(MentionEvent {
                user_id: user_id.to_owned(),
                channel_id: "C1".to_owned(),
                event_id: event_id.to_owned(),
                text: "<@U0BOT> weekly signups".to_owned(),
            }),
        }
    }

    fn immediate(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(ChatEnvelope {
                    envelope_id: "env-1".to_owned(),
                    event: ChatEvent::Unsupported { event_type: "reaction_added".to_owned() },
                })),
                Ok(None),
            ],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), immediate(2));

        runner.start().await.expect("runner should not fail");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 2);
        assert_eq!(state.acknowledgements, vec!["env-1"]);
        assert_eq!(state.disconnect_calls, 1);
        assert!(state.posted.is_empty());
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), immediate(2));

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.state.lock().await.connect_attempts, 3);
    }

    #[tokio::test]
    async fn replies_are_posted_and_duplicates_are_silent() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(mention("env-1", "Ev1"))),
                Ok(Some(mention("env-2", "Ev-dup"))),
                Ok(None),
            ],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            mention_dispatcher(OnceOnly, "EIRANA"),
            immediate(0),
        );
        runner.start().await.expect("runner completes");

        let state = transport.state.lock().await;
        assert_eq!(state.acknowledgements, vec!["env-1", "env-2"]);
        assert_eq!(
            state.posted,
            vec![OutboundReply {
                channel_id: "C1".to_owned(),
                text: "answer for Ev1".to_owned(),
                attachments: Vec::new(),
            }]
        );
    }

    #[tokio::test]
    async fn retry_budget_resets_after_each_successful_connect() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(()), Ok(())],
            vec![
                Err(TransportError::Receive("socket reset".to_owned())),
                Err(TransportError::Receive("socket reset".to_owned())),
                Ok(None),
            ],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), immediate(1));
        runner.start().await.expect("runner completes");

        let state = transport.state.lock().await;
        assert_eq!(state.connect_attempts, 3);
        assert_eq!(state.disconnect_calls, 1);
    }

    #[tokio::test]
    async fn slow_turn_does_not_delay_another_users_reply() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(mention_from("U-slow", "env-slow", "Ev-slow"))),
                Ok(Some(mention_from("U-fast", "env-fast", "Ev-fast"))),
                Ok(None),
            ],
        ));

        let runner = SocketModeRunner::new(
            transport.clone(),
            mention_dispatcher(SlowForOneUser, "EIRANA"),
            immediate(0),
        );
        runner.start().await.expect("runner completes");

        let state = transport.state.lock().await;
        assert_eq!(state.acknowledgements, vec!["env-slow", "env-fast"]);
        let texts: Vec<&str> = state.posted.iter().map(|reply| reply.text.as_str()).collect();
        assert_eq!(texts, vec!["answer for U-fast", "answer for U-slow"]);
        assert_eq!(state.disconnect_calls, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::from(&IngressConfig {
            max_retries: 5,
            base_delay_ms: 250,
            max_delay_ms: 1_000,
        });
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(30), Duration::from_millis(1_000));
    }

    #[test]
    fn extracts_event_and_channel_correlation_fields() {
        let envelope = mention("env-3", "Ev42");
        let (event_id, channel_id) = super::correlation_fields(&envelope);
        assert_eq!(event_id, Some("Ev42"));
        assert_eq!(channel_id, Some("C1"));
    }
}
