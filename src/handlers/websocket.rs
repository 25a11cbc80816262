/// WebSocket handler for the live chat transport.
/// One actor per connection; frames are handed to the shared `ChatGateway`.
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;

use crate::auth::JwtDecoder;
use crate::error::ChatError;
use crate::gateway::{ChatGateway, ConnectionId, OutboundFrame};

/// WebSocket actor for one authenticated user connection
pub struct WsSession {
    user_id: String,
    connection_id: Option<ConnectionId>,
    gateway: web::Data<ChatGateway>,
}

impl WsSession {
    pub fn new(user_id: String, gateway: web::Data<ChatGateway>) -> Self {
        WsSession {
            user_id,
            connection_id: None,
            gateway,
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("WebSocket connection started: {}", self.user_id);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let addr = ctx.address();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                addr.do_send(OutgoingFrame(frame));
            }
            // Sender dropped: this connection was replaced or unregistered
            addr.do_send(Displaced);
        });

        // Register before any inbound frame is processed
        let gateway = self.gateway.clone();
        let user_id = self.user_id.clone();
        ctx.wait(
            async move { gateway.connect(&user_id, tx).await }
                .into_actor(self)
                .map(|id, act, _ctx| {
                    act.connection_id = Some(id);
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("WebSocket connection stopped: {}", self.user_id);
        if let Some(id) = self.connection_id {
            let gateway = self.gateway.clone();
            let user_id = self.user_id.clone();
            actix::spawn(async move {
                gateway.release(&user_id, id).await;
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let gateway = self.gateway.clone();
                let user_id = self.user_id.clone();
                let text = text.to_string();
                // One frame at a time per connection
                ctx.wait(
                    async move { gateway.handle_text(&user_id, &text).await }.into_actor(self),
                );
            }
            Ok(ws::Message::Binary(_)) => {
                log::warn!("Binary frame from {}, closing connection", self.user_id);
                let error = OutboundFrame::error(
                    "Binary frames are not supported",
                    Some(
                        ChatError::Protocol("expected JSON text frames".to_string())
                            .public_message(),
                    ),
                );
                if let Ok(text) = serde_json::to_string(&error) {
                    ctx.text(text);
                }
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Unsupported,
                    description: Some("Binary frames are not supported".to_string()),
                }));
                ctx.stop();
            }
            Ok(ws::Message::Ping(bytes)) => {
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::error!("WebSocket protocol error for {}: {}", self.user_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct OutgoingFrame(String);

impl Handler<OutgoingFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutgoingFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Displaced;

impl Handler<Displaced> for WsSession {
    type Result = ();

    fn handle(&mut self, _msg: Displaced, ctx: &mut Self::Context) {
        log::info!("Closing superseded connection for {}", self.user_id);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some("Connection replaced".to_string()),
        }));
        ctx.stop();
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade, authenticated by the `token` query parameter
/// GET /ws?token=... and GET /chat?token=...
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<TokenQuery>,
    decoder: web::Data<JwtDecoder>,
    gateway: web::Data<ChatGateway>,
) -> actix_web::Result<HttpResponse> {
    let claims = query
        .token
        .as_deref()
        .and_then(|token| decoder.decode(token))
        .ok_or_else(|| ChatError::Unauthorized("Invalid or expired token".to_string()))?;

    let resp = ws::start(WsSession::new(claims.user_id, gateway), &req, stream)?;
    Ok(resp)
}
