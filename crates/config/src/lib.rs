//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 推送中心（缓冲容量、心跳与写超时）
//! - 可选的通知持久化数据库

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 推送中心配置
    #[serde(default)]
    pub hub: HubConfig,
    /// 数据库配置，未设置时通知只保存在内存中
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// 内存通知日志配置，仅在未配置数据库时生效
    #[serde(default)]
    pub notification_log: NotificationLogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// 内存通知日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationLogConfig {
    /// 每个用户最多保留的记录数，超出时丢弃最旧的记录
    pub memory_limit: usize,
}

impl Default for NotificationLogConfig {
    fn default() -> Self {
        Self { memory_limit: 100 }
    }
}

/// 推送中心配置
///
/// 心跳间隔由 `pong_wait_ms` 推导（9/10），两个泵共用这一组常量。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// 每条连接的出站缓冲容量
    pub outbound_buffer: usize,
    /// 分发循环工作队列容量，满时发布方会被阻塞
    pub dispatch_queue: usize,
    /// 存活超时：超过该时长未收到 pong 即断开连接
    pub pong_wait_ms: u64,
    /// 单次写入的截止时间
    pub write_wait_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 16,
            dispatch_queue: 32,
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
        }
    }
}

impl HubConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// 心跳探测间隔，必须小于存活超时
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms / 10 * 9 + self.pong_wait_ms % 10 * 9 / 10)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_buffer == 0 || self.dispatch_queue == 0 {
            return Err(ConfigError::InvalidHubConfig(
                "buffer capacities must be greater than 0".to_string(),
            ));
        }
        if self.ping_period().is_zero() {
            return Err(ConfigError::InvalidHubConfig(
                "pong wait is too short to derive a ping period".to_string(),
            ));
        }
        if self.write_wait_ms == 0 || self.write_wait_ms >= self.pong_wait_ms {
            return Err(ConfigError::InvalidHubConfig(
                "write wait must be positive and shorter than pong wait".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    /// 注意：生产环境应该通过 load() 覆盖 JWT 密钥
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
                expiration_hours: 24,
            },
            hub: HubConfig::default(),
            database: None,
            notification_log: NotificationLogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载顺序：默认值 -> 可选配置文件（PUSH_CONFIG_FILE）-> 环境变量（PUSH_*，`__` 分隔层级）
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("PUSH_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment = figment.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                figment = figment.merge(Json::file(path));
            } else {
                figment = figment.merge(Toml::file(path));
            }
        }
        Self::from_figment(figment.merge(Env::prefixed("PUSH_").split("__")))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT expiration must be positive".to_string(),
            ));
        }

        if let Some(database) = &self.database {
            if database.url.is_empty() {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "Database URL cannot be empty".to_string(),
                ));
            }
            if database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        if self.notification_log.memory_limit == 0 {
            return Err(ConfigError::InvalidNotificationLogConfig(
                "memory limit must be greater than 0".to_string(),
            ));
        }

        self.hub.validate()
    }

    /// 监听地址，形如 `127.0.0.1:8080`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid hub configuration: {0}")]
    InvalidHubConfig(String),
    #[error("Invalid notification log configuration: {0}")]
    InvalidNotificationLogConfig(String),
}
