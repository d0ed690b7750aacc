use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// 日志中隐藏连接串里的密码
pub fn redact_url(database_url: &str) -> String {
    let Some((scheme, rest)) = database_url.split_once("://") else {
        return database_url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}", scheme, user, host)
        }
        None => database_url.to_string(),
    }
}

/// 创建数据库连接池
///
/// 快照加载时多个查询并发执行, 连接数至少为 2。
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let connect_options = PgConnectOptions::from_str(database_url)?
        // 慢查询阈值 5 秒
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(5));

    let max_connections = max_connections.max(2);
    tracing::info!(
        "Connecting to {} (max_connections = {})",
        redact_url(database_url),
        max_connections
    );

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await
}
