//! 应用层实现。
//!
//! 实时推送子系统：推送中心（`Hub`）独占连接注册表并串行化所有注册、注销与扇出，
//! 每条连接（`Client`）各自拥有有界出站缓冲和读/写两个泵。

pub mod client;
pub mod error;
pub mod frame;
mod guard;
pub mod hub;

pub use client::Client;
pub use error::HubError;
pub use frame::WireFrame;
pub use hub::Hub;
