//! # EndoReport集成模块
//!
//! 外部AI模型的接入边界：
//! - 诊断提供方接口，屏蔽具体模型SDK
//! - 通过外部命令接入模型的通用提供方
//! - 模型响应的结构校验
//! - 按影像管理在途请求，后提交的请求取消先前的请求

pub mod command;
pub mod coordinator;
pub mod provider;

pub use command::CommandProvider;
pub use coordinator::DiagnosisCoordinator;
pub use provider::{build_diagnosis_prompt, parse_diagnosis_response, DiagnosisProvider, DiagnosisRequest};
