//! 领域实体定义
//!
//! 包含推送信封与持久化通知记录。

pub mod envelope;
pub mod notification;

// 重新导出核心实体
pub use envelope::Envelope;
pub use notification::Notification;
