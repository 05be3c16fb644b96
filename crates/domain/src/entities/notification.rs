//! 通知实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::value_objects::UserId;

/// 持久化的推送记录，每次成功发布针对目标用户生成一条，与是否存在在线连接无关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// 通知ID
    pub id: Uuid,
    /// 接收用户
    pub user_id: UserId,
    /// 事件名
    pub event: String,
    /// 事件负载
    pub payload: JsonValue,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: UserId, event: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event: event.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
