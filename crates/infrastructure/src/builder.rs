use std::sync::Arc;

use config::{DatabaseConfig, NotificationLogConfig};
use domain::NotificationRepository;
use thiserror::Error;

use crate::{
    memory::InMemoryNotificationRepository,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgNotificationRepository},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 组装好的基础设施依赖
#[derive(Clone)]
pub struct Infrastructure {
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Infrastructure {
    /// 配置了数据库时连接 PostgreSQL 并执行迁移，否则退回有上限的内存实现
    pub async fn connect(
        database: Option<&DatabaseConfig>,
        notification_log: &NotificationLogConfig,
    ) -> Result<Self, InfrastructureError> {
        let notifications: Arc<dyn NotificationRepository> = match database {
            Some(database) => {
                let pool = create_pg_pool(&database.url, database.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!("notification log backed by postgres");
                Arc::new(PgNotificationRepository::new(pool))
            }
            None => {
                tracing::warn!(
                    memory_limit = notification_log.memory_limit,
                    "no database configured, recent notifications are kept in memory only"
                );
                Arc::new(InMemoryNotificationRepository::new(
                    notification_log.memory_limit,
                ))
            }
        };

        Ok(Self { notifications })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn without_database_falls_back_to_memory_log() {
        let infrastructure = Infrastructure::connect(None, &NotificationLogConfig::default())
            .await
            .unwrap();
        infrastructure
            .notifications
            .create_notification(UserId::from(Uuid::new_v4()), "orders.new", &json!({}))
            .await
            .unwrap();
    }
}
