//! 推送信封
//!
//! 服务端推送给客户端的唯一消息形态：`{"type": <事件名>, "data": <任意 JSON>}`。
//! 信封本身不带序号、版本或确认字段，任意连接都可以随时断开重建。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// 事件名，由发布方决定，对推送中心不透明
    #[serde(rename = "type")]
    pub event: String,
    /// 事件负载，对推送中心不透明
    pub data: JsonValue,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: JsonValue) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// 序列化为线上传输的 JSON 文本
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
