//! 错误定义模块

use thiserror::Error;

/// 内镜报告系统统一错误类型
#[derive(Error, Debug)]
pub enum EndoError {
    #[error("存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("格式错误: {0}")]
    Format(String),

    #[error("AI响应错误: {0}")]
    AiResponse(String),

    #[error("AI辅助功能已关闭")]
    AiDisabled,

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

/// 内镜报告系统统一结果类型
pub type Result<T> = std::result::Result<T, EndoError>;
