pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod service;
pub mod store;

pub use config::AppConfig;
pub use db::{create_pool, load_store};
pub use error::{EngineError, EngineResult};
pub use service::EstimateEngine;
pub use store::EstimateStore;
