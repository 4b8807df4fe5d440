//! 配置管理
//!
//! 分层加载应用配置：内置默认值、可选的 TOML 文件、`ENDO_` 前缀的环境变量（嵌套键以 `__` 分隔，
//! 例如 `ENDO_AI__REQUEST_TIMEOUT_SECS`）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "endoreport.toml";

/// EndoReport完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndoConfig {
    /// 存储配置
    pub storage: StorageConfig,
    /// AI配置
    pub ai: AiConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 键值存储目录
    pub data_dir: String,
    /// 备份和CSV导出的默认目录
    pub export_dir: Option<String>,
}

/// AI配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// 是否允许提交诊断请求
    pub enabled: bool,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 诊断命令行，未配置时无法提交请求
    pub command: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./endoreport-data".to_string(),
            export_dir: None,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout_secs: 60,
            command: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EndoConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    /// 导出目录，未配置时使用数据目录
    pub fn export_dir(&self) -> PathBuf {
        self.storage
            .export_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.request_timeout_secs)
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: EndoConfig,
    /// 配置文件路径
    config_path: Option<PathBuf>,
    validator: ConfigValidator,
}

impl ConfigManager {
    /// 加载并校验配置；文件不存在时只使用默认值和环境变量
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    fn load_config(config_path: Option<&Path>) -> Result<EndoConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("ENDO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: EndoConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    pub fn config(&self) -> &EndoConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 校验并保存新配置
    pub async fn update_config(&mut self, new_config: EndoConfig) -> Result<()> {
        self.validator.validate(&new_config)?;
        self.config = new_config;
        self.save_config().await?;

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .context("No configuration file path set")?;
        let config_str =
            toml::to_string_pretty(&self.config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&mut self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;
        self.config = new_config;
        Ok(())
    }

    pub fn validate_config(&self) -> Result<()> {
        self.validator.validate(&self.config)
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    validator: fn(&EndoConfig) -> bool,
    error_message: &'static str,
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "storage.data_dir",
                validator: |config| !config.storage.data_dir.trim().is_empty(),
                error_message: "Data directory cannot be empty",
            },
            ValidationRule {
                field_path: "ai.request_timeout_secs",
                validator: |config| config.ai.request_timeout_secs > 0,
                error_message: "AI request timeout cannot be 0",
            },
            ValidationRule {
                field_path: "ai.command",
                validator: |config| {
                    config
                        .ai
                        .command
                        .as_deref()
                        .map_or(true, |command| !command.trim().is_empty())
                },
                error_message: "AI command cannot be blank",
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    let level = config.logging.level.trim().to_ascii_lowercase();
                    LOG_LEVELS.contains(&level.as_str()) || level.contains('=')
                },
                error_message: "Unknown log level",
            },
        ];

        Self { validation_rules }
    }

    pub fn validate(&self, config: &EndoConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if !(rule.validator)(config) {
                error!("Configuration validation failed for {}", rule.field_path);
                return Err(anyhow::anyhow!("{}: {}", rule.field_path, rule.error_message));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(Some(&dir.path().join(DEFAULT_CONFIG_FILE))).unwrap();
        let config = manager.config();

        assert!(config.ai.enabled);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.export_dir(), config.data_dir());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            "[ai]\nrequest_timeout_secs = 5\ncommand = \"diagnose --json\"\n\n[storage]\ndata_dir = \"/var/lib/endoreport\"\n",
        )
        .unwrap();

        let config = ConfigManager::new(Some(&path)).unwrap().config().clone();
        assert_eq!(config.ai.request_timeout_secs, 5);
        assert_eq!(config.ai.command.as_deref(), Some("diagnose --json"));
        assert!(config.ai.enabled);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/endoreport"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[ai]\nrequest_timeout_secs = 0\n").unwrap();
        assert!(ConfigManager::new(Some(&path)).is_err());
    }

    #[test]
    fn test_validator_rules() {
        let validator = ConfigValidator::new();
        let mut config = EndoConfig::default();
        assert!(validator.validate(&config).is_ok());

        config.logging.level = "endo_records=debug,info".to_string();
        assert!(validator.validate(&config).is_ok());

        config.logging.level = "verbose".to_string();
        assert!(validator.validate(&config).is_err());

        config.logging.level = "warn".to_string();
        config.ai.command = Some("  ".to_string());
        assert!(validator.validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_update_saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let mut manager = ConfigManager::new(Some(&path)).unwrap();

        let mut config = manager.config().clone();
        config.ai.enabled = false;
        config.storage.export_dir = Some("/tmp/exports".to_string());
        manager.update_config(config.clone()).await.unwrap();

        let reloaded = ConfigManager::new(Some(&path)).unwrap();
        assert_eq!(reloaded.config(), &config);

        let mut bad = config;
        bad.storage.data_dir = String::new();
        assert!(manager.update_config(bad).await.is_err());
        assert!(!manager.config().storage.data_dir.is_empty());
    }
}
