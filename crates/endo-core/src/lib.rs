//! # EndoReport Core
//!
//! 内镜报告系统的核心模块，提供基础数据结构、错误定义、部位表、报告模板和通用工具。

pub mod error;
pub mod migration;
pub mod models;
pub mod regions;
pub mod utils;

pub use error::{EndoError, Result};
pub use models::*;
pub use regions::{report_template, ReportTemplate};
