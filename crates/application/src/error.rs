use config::ConfigError;
use thiserror::Error;

/// 推送中心的同步错误：启动时配置无效，或发布时负载无法序列化
///
/// 慢消费者、传输失败与持久化失败都不会在这里出现：它们只影响单条连接或只记录日志。
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid hub configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}
