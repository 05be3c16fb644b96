//! 单条持久连接
//!
//! 每条连接有两个独立的泵，一起启动、一起结束：
//! - 写泵：消费出站缓冲，每次写入带截止时间；按心跳间隔发送 ping 探测。
//! - 读泵：只用于存活检测，收到 pong 时刷新读截止时间，其余入站帧读取后丢弃。
//!
//! 任一泵退出（读写失败、超时、缓冲关闭、取消或 panic）都会调用幂等的 [`Client::close`]。

use std::fmt;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::HubConfig;
use domain::{ConnectionId, UserId};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::frame::WireFrame;
use crate::guard;
use crate::hub::{Control, Hub, Outbound};

/// 已注册到推送中心的连接句柄，克隆后指向同一条连接
#[derive(Clone)]
pub struct Client {
    id: ConnectionId,
    user_id: UserId,
    shared: Arc<ClientShared>,
}

struct ClientShared {
    closed: AtomicBool,
    shutdown: CancellationToken,
    control: mpsc::UnboundedSender<Control>,
}

impl Client {
    pub(crate) fn new(
        user_id: UserId,
        control: mpsc::UnboundedSender<Control>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            shared: Arc::new(ClientShared {
                closed: AtomicBool::new(false),
                shutdown,
                control,
            }),
        }
    }

    /// 为已完成握手与身份解析的传输创建连接：注册到推送中心并启动读写泵
    ///
    /// 传输以一对 `Sink<WireFrame>` / `Stream<Item = Result<WireFrame, E>>` 给出。
    pub fn spawn<Si, St, E>(hub: &Hub, user_id: UserId, sink: Si, stream: St) -> Client
    where
        Si: Sink<WireFrame> + Unpin + Send + 'static,
        Si::Error: Display + Send + 'static,
        St: Stream<Item = Result<WireFrame, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let config = hub.config().clone();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
        let client = Client::new(user_id, hub.control_sender(), hub.child_token());

        hub.register(client.clone(), outbound_tx);
        tracing::info!(%user_id, connection_id = %client.id, "client connected");

        let writer = WritePump {
            client: client.clone(),
            outbound: outbound_rx,
            sink,
            config: config.clone(),
        };
        tokio::spawn(supervise(client.clone(), "write_pump", writer.run()));

        let reader = ReadPump {
            client: client.clone(),
            stream,
            config,
        };
        tokio::spawn(supervise(client.clone(), "read_pump", reader.run()));

        client
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// 断开连接：注销并取消两个泵。可从任一泵或分发循环并发调用，只生效一次
    pub fn close(&self) {
        if self
            .shared
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let _ = self.shared.control.send(Control::Unregister {
            user_id: self.user_id,
            connection_id: self.id,
        });
        self.shared.shutdown.cancel();
        tracing::info!(user_id = %self.user_id, connection_id = %self.id, "client disconnected");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// 等待连接被断开（包括推送中心关闭）
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 泵的根：捕获 panic，无论以何种方式结束都断开该连接
async fn supervise<F>(client: Client, task: &'static str, pump: F)
where
    F: Future<Output = ()>,
{
    if !guard::guarded(task, pump).await {
        tracing::warn!(
            user_id = %client.user_id,
            connection_id = %client.id,
            task,
            "pump faulted, tearing down connection"
        );
    }
    client.close();
}

enum WriteExit {
    /// 推送中心已注销该连接，缓冲中剩余消息已写完
    BufferClosed,
    Cancelled,
    Failed,
}

struct WritePump<Si> {
    client: Client,
    outbound: mpsc::Receiver<Outbound>,
    sink: Si,
    config: HubConfig,
}

impl<Si> WritePump<Si>
where
    Si: Sink<WireFrame> + Unpin,
    Si::Error: Display,
{
    async fn run(mut self) {
        let shutdown = self.client.shutdown_token();
        let period = self.config.ping_period();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break WriteExit::Cancelled,
                item = self.outbound.recv() => match item {
                    Some(payload) => {
                        if let Err(exit) = self.write(&shutdown, WireFrame::Text(payload.to_string())).await {
                            break exit;
                        }
                    }
                    None => break WriteExit::BufferClosed,
                },
                _ = ticker.tick() => {
                    if let Err(exit) = self.write(&shutdown, WireFrame::Ping(Vec::new())).await {
                        break exit;
                    }
                }
            }
        };

        if matches!(exit, WriteExit::BufferClosed) {
            let _ = self.write(&shutdown, WireFrame::Close).await;
        }

        match time::timeout(self.config.write_wait(), self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(connection_id = %self.client.id, error = %err, "failed to close transport");
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.client.id, "timed out closing transport");
            }
        }
    }

    async fn write(
        &mut self,
        shutdown: &CancellationToken,
        frame: WireFrame,
    ) -> Result<(), WriteExit> {
        let deadline = self.config.write_wait();
        tokio::select! {
            _ = shutdown.cancelled() => Err(WriteExit::Cancelled),
            result = time::timeout(deadline, self.sink.send(frame)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => {
                    tracing::debug!(connection_id = %self.client.id, error = %err, "write failed");
                    Err(WriteExit::Failed)
                }
                Err(_) => {
                    tracing::debug!(connection_id = %self.client.id, "write deadline exceeded");
                    Err(WriteExit::Failed)
                }
            },
        }
    }
}

struct ReadPump<St> {
    client: Client,
    stream: St,
    config: HubConfig,
}

impl<St, E> ReadPump<St>
where
    St: Stream<Item = Result<WireFrame, E>> + Unpin,
    E: Display,
{
    async fn run(mut self) {
        let shutdown = self.client.shutdown_token();
        let pong_wait = self.config.pong_wait();
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = time::timeout_at(deadline, self.stream.next()) => next,
            };

            match next {
                Err(_) => {
                    tracing::info!(
                        user_id = %self.client.user_id,
                        connection_id = %self.client.id,
                        "no pong within liveness timeout"
                    );
                    break;
                }
                Ok(None) | Ok(Some(Ok(WireFrame::Close))) => {
                    tracing::debug!(connection_id = %self.client.id, "peer closed the connection");
                    break;
                }
                Ok(Some(Err(err))) => {
                    tracing::debug!(connection_id = %self.client.id, error = %err, "read failed");
                    break;
                }
                Ok(Some(Ok(frame))) => {
                    if frame.is_pong() {
                        deadline = Instant::now() + pong_wait;
                    }
                }
            }
        }
    }
}
