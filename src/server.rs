/// HTTP server factory and configuration.
/// Provides the route table and a reusable function to create the HTTP server
/// for use in both the main binary and tests.
use actix_web::{middleware, web, App, HttpServer};

use crate::auth::JwtDecoder;
use crate::db::DbPool;
use crate::error::ChatError;
use crate::gateway::ChatGateway;
use crate::handlers::{rest, ws_connect};

/// Register every REST and WebSocket route.
/// Fixed path segments are registered ahead of the `{id}` routes they overlap with.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ChatError::Validation(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ChatError::Validation(err.to_string()).into()
    }))
    .route("/health", web::get().to(rest::health))
    // Users
    .route("/users", web::post().to(rest::register_user))
    .route("/users/{user_id}", web::get().to(rest::get_user))
    // Chats
    .route("/chats", web::post().to(rest::create_chat))
    .route("/chats", web::get().to(rest::get_user_chats))
    .route(
        "/chats/with-recent-messages",
        web::get().to(rest::get_user_chats_with_recent_messages),
    )
    .route("/chats/{chat_id}", web::get().to(rest::get_chat))
    .route("/chats/{chat_id}/group", web::get().to(rest::get_group_info))
    .route(
        "/chats/{chat_id}/participants",
        web::post().to(rest::add_participant),
    )
    .route(
        "/chats/{chat_id}/participants/{user_id}",
        web::delete().to(rest::remove_participant),
    )
    .route("/chats/{chat_id}/admin", web::put().to(rest::change_admin))
    // Messages
    .route(
        "/chats/{chat_id}/messages",
        web::get().to(rest::get_chat_messages),
    )
    .route(
        "/chats/{chat_id}/messages/media",
        web::get().to(rest::get_media_messages),
    )
    .route(
        "/chats/{chat_id}/messages/search",
        web::get().to(rest::search_messages),
    )
    .route(
        "/chats/{chat_id}/messages/filter",
        web::get().to(rest::filter_messages),
    )
    .route(
        "/chats/{chat_id}/messages/{message_id}",
        web::put().to(rest::edit_message),
    )
    .route(
        "/chats/{chat_id}/messages/{message_id}",
        web::delete().to(rest::delete_message),
    )
    .route(
        "/chats/{chat_id}/messages/{message_id}/history",
        web::get().to(rest::get_message_history),
    )
    .route(
        "/chats/{chat_id}/messages/{message_id}/read",
        web::put().to(rest::mark_message_read),
    )
    // WebSocket endpoints
    .route("/ws", web::get().to(ws_connect))
    .route("/chat", web::get().to(ws_connect));
}

/// Create a configured HTTP server
///
/// Takes the database pool, the live gateway, the token decoder and a bind
/// address, then returns a fully configured `HttpServer` ready to be run.
///
/// # Example
/// ```ignore
/// let pool = db::create_pool("chatserver.db")?;
/// let gateway = web::Data::new(ChatGateway::new(pool.clone()));
/// let decoder = web::Data::new(JwtDecoder::new(&secret, "HS256")?);
/// let pool = web::Data::new(pool);
/// let server = server::create_http_server(pool, gateway, decoder, "127.0.0.1:4000")?;
/// server.await?;
/// ```
pub fn create_http_server(
    pool: web::Data<DbPool>,
    gateway: web::Data<ChatGateway>,
    decoder: web::Data<JwtDecoder>,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(gateway.clone())
            .app_data(decoder.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// Secret used by [`create_test_http_server`]
#[cfg(any(test, feature = "test_utils"))]
pub const TEST_JWT_SECRET: &str = "chat-server-test-secret";

/// Create a test HTTP server with an in-memory database, bound to a random port.
///
/// Returns the server, its bind address and the pool it uses. Tokens must be
/// signed with [`TEST_JWT_SECRET`].
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_http_server() -> std::io::Result<(actix_web::dev::Server, String, DbPool)> {
    let pool = crate::db::create_test_pool();
    let gateway = web::Data::new(ChatGateway::new(pool.clone()));
    let decoder = web::Data::new(
        JwtDecoder::new(TEST_JWT_SECRET, "HS256")
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?,
    );
    let pool_data = web::Data::new(pool.clone());

    // Bind to 127.0.0.1:0 to get a random available port
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .app_data(gateway.clone())
            .app_data(decoder.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind("127.0.0.1:0")?;

    let addr_str = server
        .addrs()
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    Ok((server.run(), addr_str, pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{encode_token, Claims};
    use actix_web::test;

    fn state() -> (web::Data<DbPool>, web::Data<ChatGateway>, web::Data<JwtDecoder>) {
        let pool = crate::db::create_test_pool();
        let gateway = web::Data::new(ChatGateway::new(pool.clone()));
        let decoder = web::Data::new(
            JwtDecoder::new(TEST_JWT_SECRET, "HS256").expect("Failed to build decoder"),
        );
        (web::Data::new(pool), gateway, decoder)
    }

    #[tokio::test]
    async fn test_create_http_server_with_test_pool() {
        let (pool, gateway, decoder) = state();
        let result = create_http_server(pool, gateway, decoder, "127.0.0.1:0");
        assert!(result.is_ok(), "create_http_server should succeed");
    }

    #[tokio::test]
    async fn test_create_http_server_invalid_address() {
        let (pool, gateway, decoder) = state();
        let result = create_http_server(pool, gateway, decoder, "invalid_address:99999");
        assert!(result.is_err(), "create_http_server should fail with invalid address");
    }

    #[tokio::test]
    async fn test_create_test_http_server() {
        let (_server, addr, _pool) =
            create_test_http_server().expect("create_test_http_server should succeed");
        assert!(addr.contains("127.0.0.1:"), "Address should contain 127.0.0.1:");
        let port_part = addr.split(':').nth(1).unwrap_or("");
        assert!(!port_part.is_empty(), "Port should be assigned");
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let (pool, gateway, decoder) = state();
        let app = test::init_service(
            App::new()
                .app_data(pool)
                .app_data(gateway)
                .app_data(decoder)
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_chats_require_token() {
        let (pool, gateway, decoder) = state();
        let app = test::init_service(
            App::new()
                .app_data(pool)
                .app_data(gateway)
                .app_data(decoder)
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/chats").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_recent_route_not_shadowed_by_chat_id() {
        let (pool, gateway, decoder) = state();
        let app = test::init_service(
            App::new()
                .app_data(pool)
                .app_data(gateway)
                .app_data(decoder)
                .configure(configure_routes),
        )
        .await;

        let token = encode_token(
            TEST_JWT_SECRET,
            &Claims::for_user("alice", "Alice", chrono::Duration::hours(1)),
        );
        let req = test::TestRequest::get()
            .uri("/chats/with-recent-messages")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_ws_upgrade_rejects_bad_token() {
        let (pool, gateway, decoder) = state();
        let app = test::init_service(
            App::new()
                .app_data(pool)
                .app_data(gateway)
                .app_data(decoder)
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws?token=garbage").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }
}
