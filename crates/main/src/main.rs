//! 主应用程序入口
//!
//! 组装存储、协调服务与 WebSocket 传输层并启动 Axum 服务。

use std::{sync::Arc, time::Duration};

use application::{
    Broadcaster, Clock, CoordinatorDependencies, CoordinatorService, MemoryMessageStore,
    MessageStore, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, FallbackMessageStore, PgMessageStore};
use web_api::{router, AppState, ConnectionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();

    // 存储装配：能连上 PostgreSQL 就用带内存降级的持久存储，
    // 连不上时按配置决定是直接退出还是纯内存运行
    let store = build_store(&config).await?;

    let registry = Arc::new(ConnectionRegistry::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let coordinator = Arc::new(CoordinatorService::new(CoordinatorDependencies {
        store,
        broadcaster: registry.clone() as Arc<dyn Broadcaster>,
        clock,
        rate_limit: config.rate_limit.clone(),
    }));

    // 周期对账任务：用传输层的存活连接集合修正在线状态
    let reconcile_interval = Duration::from_secs(config.presence.reconcile_interval_secs);
    tokio::spawn({
        let coordinator = coordinator.clone();
        let registry = registry.clone();
        async move {
            let mut ticker = tokio::time::interval(reconcile_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let live = registry.live_connection_ids().await;
                coordinator.reconcile(&live).await;
            }
        }
    });

    let state = AppState::new(coordinator, registry);
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("pairchat server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    let Some(database_url) = config.database.url.as_deref() else {
        tracing::info!("no DATABASE_URL configured, running with in-memory store");
        return Ok(Arc::new(MemoryMessageStore::new()));
    };

    tracing::info!(
        "connecting database: {}",
        database_url.split('@').next_back().unwrap_or("unknown")
    );

    match create_pg_pool(database_url, config.database.max_connections).await {
        Ok(pool) => {
            sqlx::migrate!("../../migrations").run(&pool).await?;
            let primary: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool));
            let fallback: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
            Ok(Arc::new(FallbackMessageStore::new(primary, fallback)))
        }
        Err(err) if config.database.require_database => {
            Err(anyhow::anyhow!("database connection failed: {err}"))
        }
        Err(err) => {
            tracing::warn!(error = %err, "database unavailable, falling back to in-memory store");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
    }
}
