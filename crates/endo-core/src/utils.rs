//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 患者ID前缀
pub const PATIENT_ID_PREFIX: &str = "PAT";
/// 报告ID前缀
pub const REPORT_ID_PREFIX: &str = "REP";
/// 影像ID前缀
pub const IMAGE_ID_PREFIX: &str = "IMG";
/// 医生ID前缀
pub const DOCTOR_ID_PREFIX: &str = "DOC";
/// 助手ID前缀
pub const ASSISTANT_ID_PREFIX: &str = "ASST";

/// 生成带前缀的唯一标识符
///
/// 格式为 `<前缀>-<毫秒时间戳>-<8位随机十六进制>`，同一毫秒内生成的ID也不会冲突。
pub fn generate_id(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), &random[..8])
}

/// 验证标识符格式：非空且不含逗号或换行（CSV导出安全）
pub fn is_valid_record_id(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty() && !id.contains(|c: char| c == ',' || c == '\n' || c == '\r')
}
