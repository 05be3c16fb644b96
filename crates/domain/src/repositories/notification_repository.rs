//! 通知持久化协作者接口定义

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::errors::RepositoryResult;
use crate::value_objects::UserId;

/// 推送事件的持久化日志
///
/// 推送中心在每次成功发布后异步、尽力而为地调用它；
/// 失败只会被记录日志，不会重试，也不会影响实时投递。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(
        &self,
        user_id: UserId,
        event: &str,
        payload: &JsonValue,
    ) -> RepositoryResult<()>;
}
