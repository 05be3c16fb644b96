//! 主应用程序入口
//!
//! 启动推送中心与 Axum Web API 服务。

use std::sync::Arc;

use application::Hub;
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;

    // 未配置数据库时只在内存中保留每个用户最近的通知
    let infrastructure =
        Infrastructure::connect(config.database.as_ref(), &config.notification_log).await?;

    let shutdown = CancellationToken::new();
    let hub = Hub::spawn_with_token(
        config.hub.clone(),
        Some(infrastructure.notifications.clone()),
        shutdown.clone(),
    )?;

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let app = router(AppState::new(hub.clone(), jwt_service));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("推送服务启动在 http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    hub.shutdown().await;
    tracing::info!("推送服务已停止");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("收到关闭信号，开始优雅关闭");
    shutdown.cancel();
}
