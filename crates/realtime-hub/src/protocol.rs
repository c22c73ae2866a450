//! SignalR JSON hub protocol messages.
//!
//! Every message is a JSON object terminated by the ASCII record separator.
//! One WebSocket text frame may carry several records.

use crate::RealtimeResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminates every JSON record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageType::Invocation),
            2 => Some(MessageType::StreamItem),
            3 => Some(MessageType::Completion),
            4 => Some(MessageType::StreamInvocation),
            5 => Some(MessageType::CancelInvocation),
            6 => Some(MessageType::Ping),
            7 => Some(MessageType::Close),
            _ => None,
        }
    }
}

/// A message sent to/from the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub msg_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl HubMessage {
    fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type: msg_type.code(),
            invocation_id: None,
            target: None,
            arguments: None,
            error: None,
            result: None,
        }
    }

    /// Create an invocation that expects a completion.
    pub fn invocation(invocation_id: &str, target: &str, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id: Some(invocation_id.to_string()),
            target: Some(target.to_string()),
            arguments: Some(arguments),
            ..Self::new(MessageType::Invocation)
        }
    }

    /// Create a keepalive ping.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_code(self.msg_type)
    }

    /// Serialize into one terminated record.
    pub fn to_frame(&self) -> RealtimeResult<String> {
        let mut frame = serde_json::to_string(self)?;
        frame.push(RECORD_SEPARATOR);
        Ok(frame)
    }
}

/// Server reply to the protocol handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// Client half of the handshake, already terminated.
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)
}

/// Split a text frame into its JSON records.
pub fn split_records(text: &str) -> Vec<String> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(str::to_string)
        .collect()
}
