//! # EndoReport管理模块
//!
//! 应用配置的加载、校验和保存

pub mod config;

pub use config::{AiConfig, ConfigManager, ConfigValidator, EndoConfig, LoggingConfig, StorageConfig};
