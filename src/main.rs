use outlay_calc::{api, create_pool, load_store, AppConfig, EstimateEngine, EstimateStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式 (类似Java格式)
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 数据库可选: 未配置时只使用内存库
    let (store, pool) = if config.has_database() {
        let pool = create_pool(&config.database.url, config.database.max_connections).await?;
        info!("Database pool created");
        let store = load_store(&pool, config.engine.default_vat_rate).await?;
        (store, Some(pool))
    } else {
        warn!("database.url is empty, running with an in-memory store only");
        (EstimateStore::new(), None)
    };

    let engine = Arc::new(EstimateEngine::new(Arc::new(store), pool, &config.engine));
    let app = api::router(api::AppState::new(engine));

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/estimates/:id/calc[/batch]  - 单行 / 批量计价");
    info!("  GET  /api/estimates/:id/totals        - 章节合计");
    info!("  GET  /api/estimates/:id/analysis      - 估算单分析");
    info!("  GET  /api/estimates/:id/export.csv    - CSV 导出");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
