use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parley_agent::{AgentRuntime, TurnReply};
use parley_core::Attachment;
use thiserror::Error;
use tracing::debug;

pub const EMPTY_MENTION_PROMPT: &str =
    "Hi! Ask me a question about your data and I'll look it up.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Mention(MentionEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Mention(_) => ChatEventType::Mention,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Mention,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionEvent {
    pub user_id: String,
    pub channel_id: String,
    pub event_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// What the transport posts back into the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub channel_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundReply),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("conversation handler failure: {0}")]
    Conversation(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher that answers mentions through `service` and ignores everything else.
pub fn mention_dispatcher<S>(service: S, bot_name: impl Into<String>) -> EventDispatcher
where
    S: ConversationService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MentionHandler::new(service, bot_name));
    dispatcher
}

/// Seam between the chat adapter and the orchestrator.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn converse(
        &self,
        user_id: &str,
        channel_id: &str,
        event_id: &str,
        text: &str,
    ) -> Result<TurnReply, EventHandlerError>;
}

#[async_trait]
impl ConversationService for AgentRuntime {
    async fn converse(
        &self,
        user_id: &str,
        channel_id: &str,
        event_id: &str,
        text: &str,
    ) -> Result<TurnReply, EventHandlerError> {
        Ok(self.handle_inbound_message(user_id, channel_id, event_id, text).await)
    }
}

#[async_trait]
impl<T> ConversationService for Arc<T>
where
    T: ConversationService + ?Sized,
{
    async fn converse(
        &self,
        user_id: &str,
        channel_id: &str,
        event_id: &str,
        text: &str,
    ) -> Result<TurnReply, EventHandlerError> {
        (**self).converse(user_id, channel_id, event_id, text).await
    }
}

pub struct MentionHandler<S> {
    service: S,
    bot_name: String,
}

impl<S> MentionHandler<S>
where
    S: ConversationService,
{
    pub fn new(service: S, bot_name: impl Into<String>) -> Self {
        Self { service, bot_name: bot_name.into() }
    }
}

#[async_trait]
impl<S> EventHandler for MentionHandler<S>
where
    S: ConversationService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Mention
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Mention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if strip_mentions(&event.text).trim().is_empty() {
            return Ok(HandlerResult::Responded(OutboundReply {
                channel_id: event.channel_id.clone(),
                text: EMPTY_MENTION_PROMPT.to_owned(),
                attachments: Vec::new(),
            }));
        }

        let query = replace_mentions(&event.text, &self.bot_name);
        let reply = self
            .service
            .converse(&event.user_id, &event.channel_id, &event.event_id, &query)
            .await?;
        if !reply.should_post() {
            debug!(
                event_name = "ingress.mention.suppressed",
                correlation_id = %ctx.correlation_id,
                event_id = %event.event_id,
                "duplicate mention produced no reply"
            );
            return Ok(HandlerResult::Processed);
        }

        Ok(HandlerResult::Responded(OutboundReply {
            channel_id: event.channel_id.clone(),
            text: reply.text,
            attachments: reply.attachments,
        }))
    }
}

/// Replaces every `<@...>` mention token with `bot_name` and trims the result.
pub fn replace_mentions(text: &str, bot_name: &str) -> String {
    rewrite_mentions(text, bot_name).trim().to_owned()
}

fn strip_mentions(text: &str) -> String {
    rewrite_mentions(text, "")
}

fn rewrite_mentions(text: &str, replacement: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        let Some(length) = rest[start..].find('>') else {
            break;
        };
        output.push_str(&rest[..start]);
        output.push_str(replacement);
        rest = &rest[start + length + 1..];
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_agent::{TurnReply, TurnStatus};
    use parley_core::Attachment;

    use super::{
        mention_dispatcher, replace_mentions, ChatEnvelope, ChatEvent, ConversationService,
        EventContext, EventDispatcher, EventHandlerError, HandlerResult, MentionEvent,
        OutboundReply, EMPTY_MENTION_PROMPT,
    };

    #[derive(Default)]
    struct RecordingConversation {
        status: Option<TurnStatus>,
        seen: Mutex<Vec<(String, String, String, String)>>,
    }

    #[async_trait]
    impl ConversationService for RecordingConversation {
        async fn converse(
            &self,
            user_id: &str,
            channel_id: &str,
            event_id: &str,
            text: &str,
        ) -> Result<TurnReply, EventHandlerError> {
            self.seen
                .lock()
                .map_err(|_| EventHandlerError::Conversation("poisoned".to_owned()))?
                .push((user_id.into(), channel_id.into(), event_id.into(), text.into()));
            Ok(TurnReply {
                status: self.status.unwrap_or(TurnStatus::Answered),
                text: format!("echo: {text}"),
                attachments: vec![Attachment {
                    file_name: "bar_chart.png".to_owned(),
                    media_type: "image/png".to_owned(),
                    data: vec![1, 2, 3],
                }],
                tool_rounds: 1,
            })
        }
    }

    fn mention(text: &str) -> ChatEnvelope {
        ChatEnvelope {
            envelope_id: "env-1".to_owned(),
            event: ChatEvent::Mention(MentionEvent {
                user_id: "U1".to_owned(),
                channel_id: "C1".to_owned(),
                event_id: "Ev1".to_owned(),
                text: text.to_owned(),
            }),
        }
    }

    #[test]
    fn mention_tokens_become_the_bot_name() {
        assert_eq!(
            replace_mentions("<@U0BOT> how many users signed up? cc <@U042>", "EIRANA"),
            "EIRANA how many users signed up? cc EIRANA"
        );
        assert_eq!(replace_mentions("  plain text  ", "EIRANA"), "plain text");
        assert_eq!(replace_mentions("broken <@U1 token", "EIRANA"), "broken <@U1 token");
    }

    #[tokio::test]
    async fn mention_is_forwarded_with_reply_and_attachments() {
        let service = std::sync::Arc::new(RecordingConversation::default());
        let dispatcher = mention_dispatcher(service.clone(), "EIRANA");

        let result = dispatcher
            .dispatch(&mention("<@U0BOT> show sales by region"), &EventContext::default())
            .await
            .expect("dispatch");

        let (channel_id, text, attachments) = match result {
            HandlerResult::Responded(OutboundReply { channel_id, text, attachments }) => {
                (channel_id, text, attachments)
            }
            other => panic!("expected a reply, got {other:?}"),
        };
        assert_eq!(channel_id, "C1");
        assert_eq!(text, "echo: EIRANA show sales by region");
        assert_eq!(attachments.len(), 1);

        let seen = service.seen.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![(
                "U1".to_owned(),
                "C1".to_owned(),
                "Ev1".to_owned(),
                "EIRANA show sales by region".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn blank_mention_gets_prompt_without_model_call() {
        let service = std::sync::Arc::new(RecordingConversation::default());
        let dispatcher = mention_dispatcher(service.clone(), "EIRANA");

        let result =
            dispatcher.dispatch(&mention("  <@U0BOT>  "), &EventContext::default()).await;

        assert!(matches!(
            result,
            Ok(HandlerResult::Responded(OutboundReply { ref text, .. }))
                if text == EMPTY_MENTION_PROMPT
        ));
        assert!(service.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn duplicate_turn_posts_nothing() {
        let service = RecordingConversation {
            status: Some(TurnStatus::Duplicate),
            ..RecordingConversation::default()
        };
        let dispatcher = mention_dispatcher(service, "EIRANA");

        let result =
            dispatcher.dispatch(&mention("<@U0BOT> again"), &EventContext::default()).await;

        assert_eq!(result, Ok(HandlerResult::Processed));
    }

    #[tokio::test]
    async fn unsupported_events_are_ignored() {
        let dispatcher = mention_dispatcher(RecordingConversation::default(), "EIRANA");
        let envelope = ChatEnvelope {
            envelope_id: "env-2".to_owned(),
            event: ChatEvent::Unsupported { event_type: "reaction_added".to_owned() },
        };

        let result = dispatcher.dispatch(&envelope, &EventContext::default()).await;

        assert_eq!(result, Ok(HandlerResult::Ignored));
        assert_eq!(EventDispatcher::new().handler_count(), 0);
    }
}
