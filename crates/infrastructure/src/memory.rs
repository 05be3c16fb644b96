//! 未配置数据库时使用的内存推送日志
//!
//! 每个用户只保留最近的 `limit` 条记录，超出后丢弃最旧的。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use domain::{Notification, NotificationRepository, RepositoryResult, UserId};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

pub struct InMemoryNotificationRepository {
    limit: usize,
    records: RwLock<HashMap<UserId, VecDeque<Notification>>>,
}

impl InMemoryNotificationRepository {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// 某个用户保留的记录，按写入顺序排列
    pub async fn records_for(&self, user_id: UserId) -> Vec<Notification> {
        self.records
            .read()
            .await
            .get(&user_id)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn create_notification(
        &self,
        user_id: UserId,
        event: &str,
        payload: &JsonValue,
    ) -> RepositoryResult<()> {
        let mut records = self.records.write().await;
        let history = records.entry(user_id).or_default();
        if history.len() >= self.limit {
            history.pop_front();
        }
        history.push_back(Notification::new(user_id, event, payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn records_are_kept_per_user_in_order() {
        let repository = InMemoryNotificationRepository::new(10);
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());

        repository
            .create_notification(alice, "orders.new", &json!({"title": "Fix bug"}))
            .await
            .unwrap();
        repository
            .create_notification(alice, "orders.updated", &json!({"title": "Fix bug"}))
            .await
            .unwrap();
        repository
            .create_notification(bob, "proposal.accepted", &json!(null))
            .await
            .unwrap();

        let records = repository.records_for(alice).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, "orders.new");
        assert_eq!(records[1].event, "orders.updated");
        assert!(records.iter().all(|record| record.user_id == alice));
        assert_eq!(repository.records_for(bob).await.len(), 1);
        assert!(repository
            .records_for(UserId::from(Uuid::new_v4()))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn history_stops_growing_at_limit() {
        let repository = InMemoryNotificationRepository::new(5);
        let user_id = UserId::from(Uuid::new_v4());

        for seq in 0..1_000 {
            repository
                .create_notification(user_id, "tick", &json!({ "seq": seq }))
                .await
                .unwrap();
        }

        let records = repository.records_for(user_id).await;
        assert_eq!(records.len(), 5);
        let kept: Vec<_> = records.iter().map(|record| record.payload["seq"].clone()).collect();
        assert_eq!(kept, vec![json!(995), json!(996), json!(997), json!(998), json!(999)]);
    }
}
