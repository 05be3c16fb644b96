//! 推送中心
//!
//! 单一分发循环独占注册表（用户 -> 连接集合），注册、注销、扇出全部以消息形式
//! 串行进入该循环，因此并发的发布/注册/注销永远不会在注册表上产生竞争。
//!
//! 投递语义是至多一次、尽力而为：出站缓冲已满的慢连接会被单方面断开，
//! 不重试也不重放，断线期间的历史由通知持久化协作者负责。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use config::HubConfig;
use domain::{ConnectionId, Envelope, NotificationRepository, UserId};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::error::HubError;
use crate::guard;

/// 出站缓冲中的一条已序列化信封，扇出给多条连接时共享同一份文本
pub type Outbound = Arc<str>;

/// 结构性变更与查询：优先于扇出处理
pub(crate) enum Control {
    Register(Subscriber),
    Unregister {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    ConnectionCount {
        user_id: UserId,
        reply: oneshot::Sender<usize>,
    },
    UserCount {
        reply: oneshot::Sender<usize>,
    },
}

struct Dispatch {
    user_id: UserId,
    payload: Outbound,
}

/// 注册表中的一条连接。注册表持有出站缓冲唯一的发送端，
/// 移除条目即关闭缓冲，写泵随后发送 Close 帧并退出。
pub(crate) struct Subscriber {
    client: Client,
    outbound: mpsc::Sender<Outbound>,
}

#[derive(Default)]
struct Registry {
    users: HashMap<UserId, HashMap<ConnectionId, Subscriber>>,
}

impl Registry {
    fn insert(&mut self, subscriber: Subscriber) {
        self.users
            .entry(subscriber.client.user_id())
            .or_default()
            .insert(subscriber.client.id(), subscriber);
    }

    /// 移除连接；用户的连接集合为空时立即删除该用户条目
    fn remove(&mut self, user_id: UserId, connection_id: ConnectionId) -> Option<Subscriber> {
        let connections = self.users.get_mut(&user_id)?;
        let removed = connections.remove(&connection_id);
        if connections.is_empty() {
            self.users.remove(&user_id);
        }
        removed
    }

    fn connection_count(&self, user_id: &UserId) -> usize {
        self.users.get(user_id).map_or(0, HashMap::len)
    }

    fn user_count(&self) -> usize {
        self.users.len()
    }

    fn drain(&mut self) -> Vec<Subscriber> {
        self.users
            .drain()
            .flat_map(|(_, connections)| connections.into_values())
            .collect()
    }
}

// 注册表只由分发循环修改；互斥锁仅作为额外保护，供 is_online 这类直接读取使用
fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 推送中心句柄，克隆成本很低
#[derive(Clone)]
pub struct Hub {
    config: Arc<HubConfig>,
    control: mpsc::UnboundedSender<Control>,
    dispatch: mpsc::Sender<Dispatch>,
    registry: Arc<Mutex<Registry>>,
    notifications: Option<Arc<dyn NotificationRepository>>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Hub {
    /// 校验配置并启动分发循环
    pub fn spawn(
        config: HubConfig,
        notifications: Option<Arc<dyn NotificationRepository>>,
    ) -> Result<Self, HubError> {
        Self::spawn_with_token(config, notifications, CancellationToken::new())
    }

    /// 启动分发循环，`shutdown` 被取消时循环退出并断开所有连接
    pub fn spawn_with_token(
        config: HubConfig,
        notifications: Option<Arc<dyn NotificationRepository>>,
        shutdown: CancellationToken,
    ) -> Result<Self, HubError> {
        config.validate()?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue);
        let registry = Arc::new(Mutex::new(Registry::default()));

        let dispatcher = Dispatcher {
            control: control_rx,
            dispatch: dispatch_rx,
            registry: registry.clone(),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(dispatcher.run());

        Ok(Self {
            config: Arc::new(config),
            control: control_tx,
            dispatch: dispatch_tx,
            registry,
            notifications,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// 提交注册；只入队，不会失败
    pub fn register(&self, client: Client, outbound: mpsc::Sender<Outbound>) {
        self.submit(Control::Register(Subscriber { client, outbound }));
    }

    /// 提交注销；对已不存在的连接是空操作
    pub fn unregister(&self, client: &Client) {
        self.submit(Control::Unregister {
            user_id: client.user_id(),
            connection_id: client.id(),
        });
    }

    /// 向某个用户的所有在线连接推送事件
    ///
    /// 唯一可能的同步错误是负载无法序列化，此时既不投递也不持久化。
    /// 分发队列已满时会等待队列腾出空间。
    pub async fn broadcast_to_user<T>(
        &self,
        user_id: UserId,
        event: &str,
        payload: &T,
    ) -> Result<(), HubError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let envelope = Envelope::new(event, serde_json::to_value(payload)?);
        let text = envelope.to_json()?;

        self.persist(user_id, envelope);

        let dispatch = Dispatch {
            user_id,
            payload: Arc::from(text),
        };
        if self.dispatch.send(dispatch).await.is_err() {
            tracing::warn!(%user_id, event, "hub is shut down, dropping broadcast");
        }
        Ok(())
    }

    /// 用户当前的连接数，会反映此前提交的所有注册与注销
    pub async fn connection_count(&self, user_id: UserId) -> usize {
        let (reply, answer) = oneshot::channel();
        self.submit(Control::ConnectionCount { user_id, reply });
        answer.await.unwrap_or(0)
    }

    /// 注册表中的用户数，空集合不会残留
    pub async fn user_count(&self) -> usize {
        let (reply, answer) = oneshot::channel();
        self.submit(Control::UserCount { reply });
        answer.await.unwrap_or(0)
    }

    /// 直接读取注册表判断用户是否在线，不经过分发循环排队
    pub fn is_online(&self, user_id: UserId) -> bool {
        lock(&self.registry).connection_count(&user_id) > 0
    }

    /// 停止分发循环并断开所有连接
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "hub dispatcher task failed");
            }
        }
    }

    pub(crate) fn control_sender(&self) -> mpsc::UnboundedSender<Control> {
        self.control.clone()
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    fn submit(&self, command: Control) {
        if self.control.send(command).is_err() {
            tracing::debug!("hub is shut down, ignoring control message");
        }
    }

    /// 分离的持久化任务：失败或 panic 只记录日志，不影响调用方和实时投递
    fn persist(&self, user_id: UserId, envelope: Envelope) {
        let Some(notifications) = self.notifications.clone() else {
            return;
        };
        tokio::spawn(guard::guarded("notification_log", async move {
            if let Err(err) = notifications
                .create_notification(user_id, &envelope.event, &envelope.data)
                .await
            {
                tracing::warn!(
                    %user_id,
                    event = %envelope.event,
                    error = %err,
                    "failed to persist notification"
                );
            }
        }));
    }
}

struct Dispatcher {
    control: mpsc::UnboundedReceiver<Control>,
    dispatch: mpsc::Receiver<Dispatch>,
    registry: Arc<Mutex<Registry>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self) {
        tracing::info!("hub dispatcher started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(command) = self.control.recv() => self.handle_control(command),
                Some(dispatch) = self.dispatch.recv() => self.fan_out(dispatch),
                else => break,
            }
        }

        let remaining = lock(&self.registry).drain();
        let closed = remaining.len();
        for subscriber in remaining {
            subscriber.client.close();
        }
        tracing::info!(closed, "hub dispatcher stopped");
    }

    fn handle_control(&mut self, command: Control) {
        let mut registry = lock(&self.registry);
        match command {
            Control::Register(subscriber) => {
                let user_id = subscriber.client.user_id();
                let connection_id = subscriber.client.id();
                registry.insert(subscriber);
                tracing::debug!(
                    %user_id,
                    %connection_id,
                    connections = registry.connection_count(&user_id),
                    "connection registered"
                );
            }
            Control::Unregister {
                user_id,
                connection_id,
            } => {
                if registry.remove(user_id, connection_id).is_some() {
                    tracing::debug!(
                        %user_id,
                        %connection_id,
                        connections = registry.connection_count(&user_id),
                        "connection unregistered"
                    );
                }
            }
            Control::ConnectionCount { user_id, reply } => {
                let _ = reply.send(registry.connection_count(&user_id));
            }
            Control::UserCount { reply } => {
                let _ = reply.send(registry.user_count());
            }
        }
    }

    /// 非阻塞地把信封推入目标用户每条连接的出站缓冲；
    /// 缓冲已满的连接被移出注册表并断开，其余连接不受影响
    fn fan_out(&mut self, dispatch: Dispatch) {
        let mut registry = lock(&self.registry);
        let Some(connections) = registry.users.get(&dispatch.user_id) else {
            tracing::trace!(user_id = %dispatch.user_id, "no live connections for user");
            return;
        };

        let mut evicted = Vec::new();
        for (connection_id, subscriber) in connections {
            match subscriber.outbound.try_send(dispatch.payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        user_id = %dispatch.user_id,
                        %connection_id,
                        "outbound buffer full, evicting slow connection"
                    );
                    evicted.push(*connection_id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*connection_id),
            }
        }

        for connection_id in evicted {
            if let Some(subscriber) = registry.remove(dispatch.user_id, connection_id) {
                subscriber.client.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(user_id: UserId) -> (Subscriber, mpsc::Receiver<Outbound>) {
        let (control, _control_rx) = mpsc::unbounded_channel();
        let client = Client::new(user_id, control, CancellationToken::new());
        let (outbound, outbound_rx) = mpsc::channel(4);
        (Subscriber { client, outbound }, outbound_rx)
    }

    fn user() -> UserId {
        UserId::from(uuid::Uuid::new_v4())
    }

    #[test]
    fn registry_groups_connections_by_user() {
        let mut registry = Registry::default();
        let alice = user();
        let bob = user();

        let (first, _rx1) = subscriber(alice);
        let (second, _rx2) = subscriber(alice);
        let (third, _rx3) = subscriber(bob);
        registry.insert(first);
        registry.insert(second);
        registry.insert(third);

        assert_eq!(registry.connection_count(&alice), 2);
        assert_eq!(registry.connection_count(&bob), 1);
        assert_eq!(registry.user_count(), 2);
    }

    #[test]
    fn registry_prunes_empty_user_sets() {
        let mut registry = Registry::default();
        let alice = user();
        let (only, _rx) = subscriber(alice);
        let connection_id = only.client.id();
        registry.insert(only);

        assert!(registry.remove(alice, connection_id).is_some());
        assert_eq!(registry.user_count(), 0);
        assert!(!registry.users.contains_key(&alice));

        // 重复移除是空操作
        assert!(registry.remove(alice, connection_id).is_none());
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn removing_subscriber_closes_its_buffer() {
        let mut registry = Registry::default();
        let alice = user();
        let (only, mut rx) = subscriber(alice);
        let connection_id = only.client.id();
        registry.insert(only);

        drop(registry.remove(alice, connection_id));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn drain_empties_the_registry() {
        let mut registry = Registry::default();
        let (first, _rx1) = subscriber(user());
        let (second, _rx2) = subscriber(user());
        registry.insert(first);
        registry.insert(second);

        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.user_count(), 0);
    }
}
