//! Slack interface for the forum replier.
//!
//! - **Socket Mode** (`socket`, `transport`) - WebSocket connection to Slack with reconnects
//! - **Envelopes** (`envelope`) - decoding of Socket Mode frames
//! - **Events** (`events`) - mentions, reactions, app home, configuration modal
//! - **Commands** (`commands`) - mention text and modal state parsing
//! - **Block Kit** (`blocks`) - replies, configure prompt, modal and home views
//! - **Web API** (`web`) - the handful of Web API methods the bot calls
//!
//! ```text
//! Slack → WebSocketTransport → SocketModeRunner → EventDispatcher → Handlers
//!                                     ↓                                ↓
//!                               SlackWebApi  ←──── HandlerResult ←── services
//! ```

pub mod blocks;
pub mod commands;
pub mod envelope;
pub mod events;
pub mod socket;
pub mod transport;
pub mod web;
