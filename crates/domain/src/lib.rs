//! 实时推送系统核心领域模型
//!
//! 包含用户/连接标识、推送信封，以及通知持久化协作者的接口定义。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use value_objects::*;
