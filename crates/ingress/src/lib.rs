//! Chat Ingress - platform-neutral event intake
//!
//! This crate connects a chat platform to the agent runtime:
//! - **Events** (`events`) - Envelope types, mention handling, reply shaping
//! - **Socket runner** (`socket`) - Transport loop with acknowledgement and reconnection
//!
//! # Architecture
//!
//! ```text
//! ChatTransport → SocketModeRunner → EventDispatcher → MentionHandler → AgentRuntime
//!                       ↑                                     ↓
//!                  post_reply  ←──────────────────────  OutboundReply
//! ```
//!
//! # Key Types
//!
//! - `SocketModeRunner` - Event loop with reconnection logic
//! - `EventDispatcher` - Routes events to the handler for their type
//! - `ConversationService` - Seam between mentions and the orchestrator
//! - `ChatTransport` - Implemented per platform by the deployment

pub mod events;
pub mod socket;
