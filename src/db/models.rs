/// Data models for chats, messages and user profiles.
/// Also holds the request/response DTOs used by the REST surface.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ChatError;

/// Media subtypes accepted for media messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    File,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "audio" => Some(MediaType::Audio),
            "file" => Some(MediaType::File),
            _ => None,
        }
    }
}

/// Discriminant of [`MessageContent`], used by filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Media,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Media => "media",
        }
    }
}

/// Message payload. Exactly one variant is populated.
///
/// On the wire a text body is mirrored into `content` so older clients that
/// only read `content` keep working; a media body carries its URL there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ContentWire", into = "ContentWire")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Media {
        media_type: MediaType,
        media_url: String,
        thumbnail_url: Option<String>,
        caption: Option<String>,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            MessageContent::Text { .. } => ContentKind::Text,
            MessageContent::Media { .. } => ContentKind::Media,
        }
    }

    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            MessageContent::Text { .. } => None,
            MessageContent::Media { media_type, .. } => Some(*media_type),
        }
    }

    /// Lowercased haystack for case-insensitive search over text and media URL fields
    pub fn search_text(&self) -> String {
        match self {
            MessageContent::Text { text } => text.to_lowercase(),
            MessageContent::Media {
                media_url,
                caption,
                ..
            } => {
                let mut haystack = media_url.to_lowercase();
                if let Some(caption) = caption {
                    haystack.push('\n');
                    haystack.push_str(&caption.to_lowercase());
                }
                haystack
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContentWire {
    #[serde(rename = "type", default = "default_content_kind")]
    kind: ContentKind,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
}

fn default_content_kind() -> ContentKind {
    ContentKind::Text
}

impl TryFrom<ContentWire> for MessageContent {
    type Error = String;

    fn try_from(wire: ContentWire) -> Result<Self, Self::Error> {
        match wire.kind {
            ContentKind::Text => {
                let text = wire
                    .text
                    .or(wire.content)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| "Text message must have text content".to_string())?;
                Ok(MessageContent::Text { text })
            }
            ContentKind::Media => {
                let media_type = wire
                    .media_type
                    .ok_or_else(|| "Media message must have a media_type".to_string())?;
                let media_url = wire
                    .media_url
                    .or(wire.content)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| "Media message must have a media_url".to_string())?;
                Ok(MessageContent::Media {
                    media_type,
                    media_url,
                    thumbnail_url: wire.thumbnail_url,
                    caption: wire.caption.or(wire.text),
                })
            }
        }
    }
}

impl From<MessageContent> for ContentWire {
    fn from(content: MessageContent) -> Self {
        match content {
            MessageContent::Text { text } => ContentWire {
                kind: ContentKind::Text,
                text: Some(text.clone()),
                content: Some(text),
                media_type: None,
                media_url: None,
                thumbnail_url: None,
                caption: None,
            },
            MessageContent::Media {
                media_type,
                media_url,
                thumbnail_url,
                caption,
            } => ContentWire {
                kind: ContentKind::Media,
                text: None,
                content: Some(media_url.clone()),
                media_type: Some(media_type),
                media_url: Some(media_url),
                thumbnail_url,
                caption,
            },
        }
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageContent::Text { text } => write!(f, "{}", text),
            MessageContent::Media {
                media_type,
                media_url,
                ..
            } => write!(f, "[{}] {}", media_type.as_str(), media_url),
        }
    }
}

/// Delivery state. Both sets only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageStatus {
    #[serde(default)]
    pub delivered_to: BTreeSet<String>,
    #[serde(default)]
    pub read_by: BTreeSet<String>,
}

impl MessageStatus {
    pub fn is_delivered(&self) -> bool {
        !self.delivered_to.is_empty()
    }

    pub fn is_read(&self) -> bool {
        !self.read_by.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRecord {
    pub old_content: MessageContent,
    pub edited_at: String,
    pub edited_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: MessageContent,
    pub timestamp: String,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edit_history: Vec<EditRecord>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// A message about to be persisted. The store assigns the timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: MessageContent,
    pub reply_to: Option<String>,
}

impl NewMessage {
    pub fn new(chat_id: &str, sender_id: &str, content: MessageContent) -> Self {
        NewMessage {
            message_id: generate_message_id(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content,
            reply_to: None,
        }
    }
}

pub fn generate_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn generate_chat_id() -> String {
    format!("chat_{}", uuid::Uuid::new_v4().simple())
}

/// Denormalized copy of a chat's most recent message for list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: MessageContent,
    pub timestamp: String,
    #[serde(default)]
    pub status: MessageStatus,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        LastMessage {
            message_id: message.message_id.clone(),
            chat_id: message.chat_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.clone(),
            status: message.status.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: String,
    pub full_name: String,
    pub profile_picture: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participants_info: Option<Vec<ParticipantInfo>>,
    pub is_group: bool,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_admin: Option<String>,
    /// Recent history, only populated by the bootstrap listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub is_active: bool,
}

impl Chat {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub chat_id: String,
    pub group_name: Option<String>,
    pub group_admin: Option<String>,
    pub participants: Vec<GroupMember>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_messages: i64,
    pub page_size: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    /// Build the envelope for `total` items, clamping `page` into `[1, total_pages]`.
    /// A `page_size` below 1 is a validation error.
    pub fn new(total: i64, page: i64, page_size: i64) -> Result<Self, ChatError> {
        if page_size < 1 {
            return Err(ChatError::Validation(
                "page_size must be at least 1".to_string(),
            ));
        }
        let total_pages = if total > 0 {
            (total + page_size - 1) / page_size
        } else {
            1
        };
        let current_page = page.clamp(1, total_pages);
        Ok(Pagination {
            current_page,
            total_pages,
            total_messages: total,
            page_size,
            has_next: current_page < total_pages,
            has_previous: current_page > 1,
        })
    }

    pub fn offset(&self) -> i64 {
        (self.current_page - 1) * self.page_size
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

/// Composite message filter. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub message_type: Option<ContentKind>,
    pub sender_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub media_type: Option<MediaType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub full_name: String,
    pub profile_picture: Option<String>,
    pub created_at: String,
}

pub const DEFAULT_PROFILE_PICTURE: &str = "/default-avatar.png";

impl User {
    pub fn participant_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id.clone(),
            full_name: self.full_name.clone(),
            profile_picture: self
                .profile_picture
                .clone()
                .unwrap_or_else(|| DEFAULT_PROFILE_PICTURE.to_string()),
        }
    }
}

// Request/Response DTOs
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub full_name: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub participants: Vec<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_admin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub content: MessageContent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddParticipantRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeAdminRequest {
    pub new_admin_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MediaQuery {
    pub media_type: Option<MediaType>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FilterQuery {
    pub message_type: Option<ContentKind>,
    pub sender_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub media_type: Option<MediaType>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl FilterQuery {
    pub fn filter(&self) -> MessageFilter {
        MessageFilter {
            message_type: self.message_type,
            sender_id: self.sender_id.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            media_type: self.media_type,
        }
    }
}
