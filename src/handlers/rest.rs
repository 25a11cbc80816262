/// REST API handlers for HTTP endpoints.
/// Chat, message and user-profile operations for an authenticated caller.
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

use crate::auth::AuthenticatedUser;
use crate::db::models::*;
use crate::db::{ChatStore, Database, DbPool};
use crate::error::{ChatError, Result};
use crate::gateway::ChatGateway;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Health check endpoint
/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok"
    }))
}

/// Create or refresh the caller's display profile
/// POST /users
pub async fn register_user(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    req: web::Json<RegisterUserRequest>,
) -> Result<HttpResponse> {
    let full_name = req.full_name.trim();
    if full_name.is_empty() {
        return Err(ChatError::Validation("full_name must not be empty".to_string()));
    }

    let profile = Database::register_user(
        &pool,
        user.user_id(),
        full_name,
        req.profile_picture.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// GET /users/{user_id}
pub async fn get_user(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    user_id: web::Path<String>,
) -> Result<HttpResponse> {
    let profile = Database::get_user(&pool, &user_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("User {} not found", user_id)))?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Create a chat and announce it to the other participants
/// POST /chats
pub async fn create_chat(
    pool: web::Data<DbPool>,
    gateway: web::Data<ChatGateway>,
    user: AuthenticatedUser,
    req: web::Json<CreateChatRequest>,
) -> Result<HttpResponse> {
    if !req.participants.iter().any(|p| p == user.user_id()) {
        return Err(ChatError::Validation(
            "The creator must be one of the participants".to_string(),
        ));
    }

    let admin = if req.is_group {
        Some(req.group_admin.as_deref().unwrap_or(user.user_id()))
    } else {
        None
    };
    let chat = ChatStore::create_chat(
        &pool,
        &req.participants,
        req.is_group,
        req.group_name.as_deref(),
        admin,
    )
    .await?;

    let notified = gateway.notify_chat_participants(&chat, user.user_id()).await;
    log::debug!("Announced chat {} to {} connected participants", chat.chat_id, notified);

    Ok(HttpResponse::Created().json(chat))
}

/// GET /chats
pub async fn get_user_chats(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    let chats = ChatStore::get_user_chats(&pool, user.user_id()).await?;
    let chats = with_participant_info(&pool, chats).await?;
    Ok(HttpResponse::Ok().json(chats))
}

/// GET /chats/with-recent-messages
pub async fn get_user_chats_with_recent_messages(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    let chats = ChatStore::get_user_chats_with_recent_messages(&pool, user.user_id()).await?;
    let chats = with_participant_info(&pool, chats).await?;
    Ok(HttpResponse::Ok().json(chats))
}

/// GET /chats/{chat_id}
pub async fn get_chat(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
) -> Result<HttpResponse> {
    let chat = require_participant(&pool, &chat_id, user.user_id()).await?;
    let mut chats = with_participant_info(&pool, vec![chat]).await?;
    Ok(HttpResponse::Ok().json(chats.remove(0)))
}

/// GET /chats/{chat_id}/group
pub async fn get_group_info(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
) -> Result<HttpResponse> {
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let info = ChatStore::get_group_info(&pool, &chat_id).await?;
    Ok(HttpResponse::Ok().json(info))
}

/// POST /chats/{chat_id}/participants
pub async fn add_participant(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
    req: web::Json<AddParticipantRequest>,
) -> Result<HttpResponse> {
    let chat = ChatStore::add_participant(&pool, &chat_id, &req.user_id, user.user_id()).await?;
    Ok(HttpResponse::Ok().json(chat))
}

/// DELETE /chats/{chat_id}/participants/{user_id}
pub async fn remove_participant(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (chat_id, member_id) = path.into_inner();
    let chat = ChatStore::remove_participant(&pool, &chat_id, &member_id, user.user_id()).await?;
    Ok(HttpResponse::Ok().json(chat))
}

/// PUT /chats/{chat_id}/admin
pub async fn change_admin(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
    req: web::Json<ChangeAdminRequest>,
) -> Result<HttpResponse> {
    let chat = ChatStore::change_admin(&pool, &chat_id, &req.new_admin_id, user.user_id()).await?;
    Ok(HttpResponse::Ok().json(chat))
}

/// GET /chats/{chat_id}/messages
pub async fn get_chat_messages(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let (page, page_size) = page_params(query.page, query.page_size)?;
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let page = ChatStore::get_chat_messages(&pool, &chat_id, page, page_size).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /chats/{chat_id}/messages/media
pub async fn get_media_messages(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
    query: web::Query<MediaQuery>,
) -> Result<HttpResponse> {
    let (page, page_size) = page_params(query.page, query.page_size)?;
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let page =
        ChatStore::get_media_messages(&pool, &chat_id, query.media_type, page, page_size).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /chats/{chat_id}/messages/search?q=
pub async fn search_messages(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse> {
    let (page, page_size) = page_params(query.page, query.page_size)?;
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let page = ChatStore::search_messages(&pool, &chat_id, &query.q, page, page_size).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /chats/{chat_id}/messages/filter
pub async fn filter_messages(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    chat_id: web::Path<String>,
    query: web::Query<FilterQuery>,
) -> Result<HttpResponse> {
    let (page, page_size) = page_params(query.page, query.page_size)?;
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let page =
        ChatStore::filter_messages(&pool, &chat_id, &query.filter(), page, page_size).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// PUT /chats/{chat_id}/messages/{message_id}
pub async fn edit_message(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<(String, String)>,
    req: web::Json<EditMessageRequest>,
) -> Result<HttpResponse> {
    let (chat_id, message_id) = path.into_inner();
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let message = ChatStore::edit_message(
        &pool,
        &chat_id,
        &message_id,
        user.user_id(),
        req.into_inner().content,
    )
    .await?;
    Ok(HttpResponse::Ok().json(message))
}

/// DELETE /chats/{chat_id}/messages/{message_id}
pub async fn delete_message(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (chat_id, message_id) = path.into_inner();
    require_participant(&pool, &chat_id, user.user_id()).await?;
    ChatStore::delete_message(&pool, &chat_id, &message_id, user.user_id()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Message deleted"
    })))
}

/// GET /chats/{chat_id}/messages/{message_id}/history
pub async fn get_message_history(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (chat_id, message_id) = path.into_inner();
    require_participant(&pool, &chat_id, user.user_id()).await?;
    let history = ChatStore::get_message_history(&pool, &chat_id, &message_id).await?;
    Ok(HttpResponse::Ok().json(history))
}

/// PUT /chats/{chat_id}/messages/{message_id}/read
pub async fn mark_message_read(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (chat_id, message_id) = path.into_inner();
    require_participant(&pool, &chat_id, user.user_id()).await?;
    ChatStore::mark_message_read(&pool, &chat_id, &message_id, user.user_id()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Message marked as read"
    })))
}

/// Defaults and bounds for listing parameters. The store clamps `page`.
fn page_params(page: Option<i64>, page_size: Option<i64>) -> Result<(i64, i64)> {
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ChatError::Validation(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok((page.unwrap_or(1), page_size))
}

async fn require_participant(pool: &DbPool, chat_id: &str, user_id: &str) -> Result<Chat> {
    let chat = ChatStore::get_chat_by_id(pool, chat_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("Chat {} not found", chat_id)))?;
    if !chat.has_participant(user_id) {
        return Err(ChatError::Forbidden(
            "You are not a participant of this chat".to_string(),
        ));
    }
    Ok(chat)
}

/// Replace each chat's stored participant info with current profiles, in one directory query
async fn with_participant_info(pool: &DbPool, mut chats: Vec<Chat>) -> Result<Vec<Chat>> {
    let ids: Vec<String> = chats
        .iter()
        .flat_map(|chat| chat.participants.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let users = Database::get_users_by_ids(pool, &ids).await?;
    let by_id: HashMap<&str, ParticipantInfo> = users
        .iter()
        .map(|u| (u.user_id.as_str(), u.participant_info()))
        .collect();

    for chat in &mut chats {
        chat.participants_info = Some(
            chat.participants
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).cloned())
                .collect(),
        );
    }
    Ok(chats)
}
