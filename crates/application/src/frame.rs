/// 与具体传输无关的帧
///
/// WebSocket 适配层把 axum 消息映射为 `WireFrame`，测试则直接用内存通道收发它。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl WireFrame {
    pub fn is_pong(&self) -> bool {
        matches!(self, WireFrame::Pong(_))
    }
}
