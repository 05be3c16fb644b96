//! Web API 层。
//!
//! 提供 Axum 路由：健康检查与 WebSocket 推送接入，连接建立后交给推送中心管理。

mod auth;
mod error;
mod routes;
mod state;
mod websocket;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
