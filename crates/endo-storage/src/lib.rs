//! # EndoReport存储模块
//!
//! 负责键值持久化、备份文档编解码以及患者CSV导入导出。

pub mod backup;
pub mod csv_transfer;
pub mod storage;

pub use backup::*;
pub use csv_transfer::*;
pub use storage::*;
