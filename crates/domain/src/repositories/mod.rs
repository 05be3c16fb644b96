//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，内层定义接口，外层实现接口。

pub mod notification_repository;

pub use notification_repository::NotificationRepository;

#[cfg(feature = "testing")]
pub use notification_repository::MockNotificationRepository;
