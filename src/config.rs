use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 为空时只使用内存库
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 新建估算单的默认增值税率 (%)
    pub default_vat_rate: u32,
    /// 批量条目数达到该值时改为 rayon 并行计算
    pub parallel_batch_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_vat_rate: 20,
            parallel_batch_threshold: 256,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or_default(),
                max_connections: 20,
            },
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// 默认值 -> outlay.toml (可选) -> 环境变量 OUTLAY__*
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();

        config::Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections as i64)?
            .set_default("engine.default_vat_rate", defaults.engine.default_vat_rate as i64)?
            .set_default(
                "engine.parallel_batch_threshold",
                defaults.engine.parallel_batch_threshold as i64,
            )?
            .add_source(config::File::with_name("outlay").required(false))
            .add_source(config::Environment::with_prefix("OUTLAY").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: std::env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or_default(),
                max_connections: 20,
            },
            engine: EngineConfig::default(),
        }
    }

    pub fn has_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_vat_rate, 20);
        assert!(cfg.parallel_batch_threshold > 0);
    }

    #[test]
    fn test_blank_database_url_means_memory_only() {
        let mut cfg = AppConfig::default();
        cfg.database.url = "   ".to_string();
        assert!(!cfg.has_database());
        cfg.database.url = "postgres://localhost/outlay".to_string();
        assert!(cfg.has_database());
    }
}
