//! Relay message contract.
//!
//! Outbound, every frame is a JSON text message:
//!
//! ```json
//! { "targetIp": "10.0.0.7", "payload": [0, 144, 128, 0, 0, ...] }
//! ```
//!
//! Inbound, the relay sends either the text `"welcome"` once the link is up,
//! or a binary message carrying one frame from the radio.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// Text the relay sends when the connection is accepted.
pub const WELCOME: &str = "welcome";

/// One frame addressed to a radio behind the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    #[serde(rename = "targetIp")]
    pub target_ip: String,
    pub payload: Vec<u8>,
}

impl RelayRequest {
    /// Encodes the request as the text message sent to the relay.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// What an inbound relay message means to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Connection acknowledgment.
    Welcome,
    /// A frame from the radio.
    Frame(Vec<u8>),
    /// The relay closed the connection.
    Closed,
    /// Anything else (pings, unexpected text).
    Ignored,
}

/// Classifies one inbound WebSocket message.
pub fn classify(message: Message) -> RelayEvent {
    match message {
        Message::Text(text) if text == WELCOME => RelayEvent::Welcome,
        Message::Binary(bytes) => RelayEvent::Frame(bytes),
        Message::Close(_) => RelayEvent::Closed,
        _ => RelayEvent::Ignored,
    }
}
