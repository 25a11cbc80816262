/// Typed live transport frames, tagged by `type` on the wire
use serde::{Deserialize, Serialize};

use crate::db::models::{Chat, Message, MessageContent};
use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    ChatMessage {
        chat_id: String,
        content: MessageContent,
        sender_id: String,
        /// Client clock, informational only
        timestamp: String,
        #[serde(default)]
        reply_to: Option<String>,
    },
    Typing {
        chat_id: String,
        is_typing: bool,
    },
    ReadReceipt {
        chat_id: String,
        message_id: String,
    },
    FriendRequest {
        to_user_id: String,
    },
    FriendRequestResponse {
        from_user_id: String,
        request_id: String,
        accepted: bool,
    },
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ChatError::Protocol(format!("Frame is not valid JSON: {}", e)))?;
        serde_json::from_value(value).map_err(|e| ChatError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FriendRequest,
    FriendRequestResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    ChatMessage {
        message: Message,
    },
    Typing {
        user_id: String,
        chat_id: String,
        is_typing: bool,
    },
    Read {
        chat_id: String,
        message_id: String,
        user_id: String,
    },
    NewChat {
        chat: Chat,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Notification {
        notification_type: NotificationKind,
        from_user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accepted: Option<bool>,
        timestamp: String,
    },
}

impl OutboundFrame {
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        OutboundFrame::Error {
            message: message.into(),
            details,
        }
    }
}
