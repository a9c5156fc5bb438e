//! 主应用程序入口
//!
//! 读取配置，组装存储与实时子系统，启动 Axum Web API 服务。

use std::sync::Arc;

use application::{Realtime, RealtimeDependencies, RealtimeSettings, SystemClock};
use config::{AppConfig, StorageBackend};
use domain::{User, UserId};
use infrastructure::{Infrastructure, StorageConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // RUST_LOG 优先，否则用配置里的过滤规则
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let storage = match config.storage.backend {
        StorageBackend::Memory => StorageConfig::Memory,
        StorageBackend::Postgres => StorageConfig::Postgres {
            database_url: config.database.url.clone(),
            max_connections: config.database.max_connections,
        },
    };
    let seed_users = config
        .storage
        .seed_users
        .iter()
        .map(|seed| User::new(UserId::from(seed.id), seed.username.trim(), seed.avatar.clone()))
        .collect();
    let infra = Infrastructure::connect(storage, seed_users).await?;

    let jwt_service = Arc::new(JwtService::new(&config.jwt, infra.users.clone()));

    let realtime = Arc::new(Realtime::new(RealtimeDependencies {
        identity: jwt_service,
        users: infra.users,
        conversations: infra.conversations,
        messages: infra.messages,
        clock: Arc::new(SystemClock),
        settings: RealtimeSettings {
            handshake_timeout: config.realtime.handshake_timeout(),
            outbound_buffer: config.realtime.outbound_buffer,
            verify_room_membership: config.realtime.verify_room_membership,
        },
    }));

    let state = AppState::new(realtime);
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("聊天服务器启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "无法监听 Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号");
}
