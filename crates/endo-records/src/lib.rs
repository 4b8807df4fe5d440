//! # EndoReport记录模块
//!
//! 临床与管理数据的唯一修改入口：
//! - 记录存储：患者、报告、影像、医护人员和设置的增删改查，每次修改整文档持久化
//! - 报告草稿：按检查类型套用模板、编辑分部位所见和影像
//! - AI诊断状态机：管理影像AI诊断的生命周期

pub mod draft;
pub mod state_machine;
pub mod store;

// 重新导出主要类型
pub use draft::ReportDraft;
pub use state_machine::{DiagnosisEvent, DiagnosisPhase, DiagnosisStateMachine};
pub use store::{ImportSummary, RecordStore, StaffRef};
