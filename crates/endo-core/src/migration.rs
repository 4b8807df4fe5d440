//! 旧版数据兼容迁移
//!
//! 在反序列化之前对原始 JSON 执行一次的读取期迁移。迁移只修改内存中的文档，
//! 持久化记录在下一次显式保存前保持原样。新增字段重命名时在 [`REPORT_MIGRATIONS`] 末尾追加步骤。

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EndoError, Result};
use crate::models::Patient;

/// 报告级迁移步骤：名称 + 就地修改函数，返回是否发生修改
pub type ReportMigration = (&'static str, fn(&mut Map<String, Value>) -> bool);

/// 按顺序执行的报告迁移
pub const REPORT_MIGRATIONS: &[ReportMigration] = &[
    ("assistant_id_to_assistant_ids", migrate_assistant_ids),
    ("procedure_date_strip_time", migrate_procedure_date),
];

/// 单助手字段 `assistantId` 合成为 `assistantIds`
fn migrate_assistant_ids(report: &mut Map<String, Value>) -> bool {
    if report.contains_key("assistantIds") {
        return false;
    }
    match report.get("assistantId") {
        Some(Value::String(id)) if !id.is_empty() => {
            let ids = Value::Array(vec![Value::String(id.clone())]);
            report.insert("assistantIds".to_string(), ids);
            true
        }
        _ => false,
    }
}

/// 带时间部分的 `procedureDate` 截断为日期
fn migrate_procedure_date(report: &mut Map<String, Value>) -> bool {
    let Some(Value::String(date)) = report.get_mut("procedureDate") else {
        return false;
    };
    match date.split_once('T') {
        Some((day, _)) => {
            *date = day.to_string();
            true
        }
        None => false,
    }
}

/// 对单个报告对象执行全部迁移
pub fn migrate_report(report: &mut Value) {
    let Value::Object(map) = report else {
        return;
    };
    for &(name, step) in REPORT_MIGRATIONS {
        if step(map) {
            let id = map.get("id").cloned().unwrap_or_default();
            debug!("Applied report migration {} to report {}", name, id);
        }
    }
}

/// 迁移并反序列化患者集合
pub fn load_patients(mut value: Value) -> Result<Vec<Patient>> {
    let patients = value
        .as_array_mut()
        .ok_or_else(|| EndoError::Format("Expected an array of patients".to_string()))?;

    for patient in patients.iter_mut() {
        if let Some(Value::Array(reports)) = patient.get_mut("reports") {
            reports.iter_mut().for_each(migrate_report);
        }
    }

    Ok(serde_json::from_value(value)?)
}
