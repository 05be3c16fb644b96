//! WebSocket 推送接入
//!
//! 校验查询参数中的访问令牌后升级连接，并把 axum 的 WebSocket 适配为推送中心的
//! `WireFrame` 收发两端。推送通道是服务端单向的，客户端上行数据只用于存活检测。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use application::{Client, Hub, WireFrame};
use domain::UserId;
use futures::{future, SinkExt, StreamExt};
use serde::Deserialize;

use crate::{error::ApiError, state::AppState};

/// WebSocket连接查询参数
#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    /// JWT access token
    #[serde(default)]
    pub token: String,
}

/// 处理WebSocket连接升级
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WebSocketQuery>,
) -> Result<Response, ApiError> {
    if query.token.is_empty() {
        tracing::warn!("WebSocket upgrade rejected: missing token");
        return Err(ApiError::unauthorized("Missing access token"));
    }

    let claims = state.jwt_service.verify_token(&query.token).map_err(|err| {
        tracing::warn!(error = ?err, "WebSocket upgrade rejected: invalid token");
        err
    })?;
    let user_id = UserId::from(claims.user_id);
    let hub = state.hub.clone();

    Ok(ws.on_upgrade(move |socket| async move {
        attach(&hub, user_id, socket);
    }))
}

fn attach(hub: &Hub, user_id: UserId, socket: WebSocket) -> Client {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: WireFrame| {
        future::ready(Ok::<_, axum::Error>(into_ws_message(frame)))
    });
    let stream = stream.map(from_ws_message);
    Client::spawn(hub, user_id, sink, stream)
}

fn into_ws_message(frame: WireFrame) -> WsMessage {
    match frame {
        WireFrame::Text(text) => WsMessage::Text(text.into()),
        WireFrame::Binary(data) => WsMessage::Binary(data.into()),
        WireFrame::Ping(data) => WsMessage::Ping(data.into()),
        WireFrame::Pong(data) => WsMessage::Pong(data.into()),
        WireFrame::Close => WsMessage::Close(None),
    }
}

fn from_ws_message(message: Result<WsMessage, axum::Error>) -> Result<WireFrame, axum::Error> {
    Ok(match message? {
        WsMessage::Text(text) => WireFrame::Text(text.to_string()),
        WsMessage::Binary(data) => WireFrame::Binary(data.to_vec()),
        WsMessage::Ping(data) => WireFrame::Ping(data.to_vec()),
        WsMessage::Pong(data) => WireFrame::Pong(data.to_vec()),
        WsMessage::Close(_) => WireFrame::Close,
    })
}
