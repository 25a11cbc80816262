/// Live gateway: dispatches inbound frames and fans events out to connected participants.
///
/// Delivery is push-only. A participant without a registered connection gets
/// nothing and catches up through the paginated REST listings.
pub mod frames;
pub mod registry;

pub use frames::{InboundFrame, NotificationKind, OutboundFrame};
pub use registry::{ConnectionId, ConnectionRegistry};

use tokio::sync::mpsc::UnboundedSender;

use crate::db::models::{Chat, MessageContent, NewMessage};
use crate::db::{now_timestamp, ChatStore, DbPool};
use crate::error::{ChatError, Result};

pub struct ChatGateway {
    registry: ConnectionRegistry,
    pool: DbPool,
}

impl ChatGateway {
    pub fn new(pool: DbPool) -> Self {
        Self::with_registry(pool, ConnectionRegistry::new())
    }

    pub fn with_registry(pool: DbPool, registry: ConnectionRegistry) -> Self {
        ChatGateway { registry, pool }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn connect(&self, user_id: &str, tx: UnboundedSender<String>) -> ConnectionId {
        let id = self.registry.register(user_id, tx).await;
        log::info!("User connected: {} (connection {})", user_id, id);
        id
    }

    /// Drop the user's connection; safe when the user is absent
    pub async fn disconnect(&self, user_id: &str) {
        self.registry.unregister(user_id).await;
        log::info!("User disconnected: {}", user_id);
    }

    /// Connection teardown. Leaves a newer connection for the same user untouched.
    pub async fn release(&self, user_id: &str, id: ConnectionId) {
        if self.registry.unregister_if_current(user_id, id).await {
            log::info!("User disconnected: {} (connection {})", user_id, id);
        } else {
            log::debug!("Connection {} for {} was already replaced", id, user_id);
        }
    }

    /// Entry point for a raw text frame from `user_id`'s connection
    pub async fn handle_text(&self, user_id: &str, text: &str) {
        match InboundFrame::parse(text) {
            Ok(frame) => self.dispatch(user_id, frame).await,
            Err(e) => {
                log::warn!("Malformed frame from {}: {}", user_id, e);
                self.send_error(user_id, "Invalid frame", &e).await;
            }
        }
    }

    /// Run the handler for one frame. Failures go back to the originating user as an `error` frame.
    pub async fn dispatch(&self, user_id: &str, frame: InboundFrame) {
        let result = match frame {
            InboundFrame::ChatMessage {
                chat_id,
                content,
                sender_id,
                reply_to,
                ..
            } => {
                self.handle_chat_message(user_id, &chat_id, &sender_id, content, reply_to)
                    .await
                    .map_err(|e| ("Message could not be sent", e))
            }
            InboundFrame::Typing { chat_id, is_typing } => self
                .handle_typing(user_id, &chat_id, is_typing)
                .await
                .map_err(|e| ("Typing notification failed", e)),
            InboundFrame::ReadReceipt {
                chat_id,
                message_id,
            } => self
                .handle_read_receipt(user_id, &chat_id, &message_id)
                .await
                .map_err(|e| ("Read receipt failed", e)),
            InboundFrame::FriendRequest { to_user_id } => {
                self.relay_friend_request(user_id, &to_user_id).await;
                Ok(())
            }
            InboundFrame::FriendRequestResponse {
                from_user_id,
                request_id,
                accepted,
            } => {
                self.relay_friend_request_response(user_id, &from_user_id, &request_id, accepted)
                    .await;
                Ok(())
            }
        };

        if let Err((summary, e)) = result {
            log::warn!("{} for {}: {}", summary, user_id, e);
            self.send_error(user_id, summary, &e).await;
        }
    }

    async fn handle_chat_message(
        &self,
        user_id: &str,
        chat_id: &str,
        sender_id: &str,
        content: MessageContent,
        reply_to: Option<String>,
    ) -> Result<()> {
        if sender_id != user_id {
            return Err(ChatError::Forbidden(
                "sender_id does not match the connected user".to_string(),
            ));
        }

        let mut new_message = NewMessage::new(chat_id, sender_id, content);
        new_message.reply_to = reply_to;
        let message = ChatStore::save_message(&self.pool, &new_message).await?;

        let chat = self.require_chat(chat_id).await?;
        let frame = OutboundFrame::ChatMessage { message };
        let delivered = self.fan_out(chat.participants.iter(), &frame).await;
        log::debug!(
            "Message in {} delivered live to {}/{} participants",
            chat_id,
            delivered,
            chat.participants.len()
        );
        Ok(())
    }

    async fn handle_typing(&self, user_id: &str, chat_id: &str, is_typing: bool) -> Result<()> {
        let chat = self.require_member_chat(chat_id, user_id).await?;
        let frame = OutboundFrame::Typing {
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            is_typing,
        };
        self.fan_out(chat.participants.iter().filter(|p| *p != user_id), &frame)
            .await;
        Ok(())
    }

    /// Notify the other participants now; persist the receipt in a detached task
    async fn handle_read_receipt(
        &self,
        user_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<()> {
        let chat = self.require_member_chat(chat_id, user_id).await?;
        let frame = OutboundFrame::Read {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.fan_out(chat.participants.iter().filter(|p| *p != user_id), &frame)
            .await;

        let pool = self.pool.clone();
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            let persisted =
                ChatStore::mark_message_read(&pool, &chat_id, &message_id, &user_id).await;
            if let Err(e) = persisted {
                log::error!(
                    "Failed to persist read receipt for {} in {} by {}: {}",
                    message_id,
                    chat_id,
                    user_id,
                    e
                );
            }
        });
        Ok(())
    }

    async fn relay_friend_request(&self, user_id: &str, to_user_id: &str) {
        let frame = OutboundFrame::Notification {
            notification_type: NotificationKind::FriendRequest,
            from_user_id: user_id.to_string(),
            to_user_id: Some(to_user_id.to_string()),
            request_id: None,
            accepted: None,
            timestamp: now_timestamp(),
        };
        self.send_frame(to_user_id, &frame).await;
    }

    async fn relay_friend_request_response(
        &self,
        user_id: &str,
        requester_id: &str,
        request_id: &str,
        accepted: bool,
    ) {
        let frame = OutboundFrame::Notification {
            notification_type: NotificationKind::FriendRequestResponse,
            from_user_id: user_id.to_string(),
            to_user_id: None,
            request_id: Some(request_id.to_string()),
            accepted: Some(accepted),
            timestamp: now_timestamp(),
        };
        self.send_frame(requester_id, &frame).await;
    }

    /// Push `new_chat` to every participant except the creator
    pub async fn notify_chat_participants(&self, chat: &Chat, exclude_user_id: &str) -> usize {
        let frame = OutboundFrame::NewChat { chat: chat.clone() };
        self.fan_out(
            chat.participants.iter().filter(|p| *p != exclude_user_id),
            &frame,
        )
        .await
    }

    /// Independent best-effort sends. Returns how many recipients were reachable.
    async fn fan_out<'a>(
        &self,
        recipients: impl Iterator<Item = &'a String>,
        frame: &OutboundFrame,
    ) -> usize {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode outbound frame: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for recipient in recipients {
            if self.registry.send_to(recipient, &text).await {
                delivered += 1;
            }
        }
        delivered
    }

    async fn send_frame(&self, user_id: &str, frame: &OutboundFrame) -> bool {
        let recipient = user_id.to_string();
        self.fan_out(std::iter::once(&recipient), frame).await == 1
    }

    async fn send_error(&self, user_id: &str, message: &str, cause: &ChatError) {
        let frame = OutboundFrame::error(message, Some(cause.public_message()));
        self.send_frame(user_id, &frame).await;
    }

    async fn require_chat(&self, chat_id: &str) -> Result<Chat> {
        ChatStore::get_chat_by_id(&self.pool, chat_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))
    }

    async fn require_member_chat(&self, chat_id: &str, user_id: &str) -> Result<Chat> {
        let chat = self.require_chat(chat_id).await?;
        if !chat.has_participant(user_id) {
            return Err(ChatError::Forbidden(format!(
                "{} is not a participant of {}",
                user_id, chat_id
            )));
        }
        Ok(chat)
    }
}
