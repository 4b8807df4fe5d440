//! 备份和恢复
//!
//! 备份文件是一个 JSON 对象，顶层包含 `patients`、`doctors`、`assistants` 三个数组及可选的 `settings`。
//! 恢复时先完整解析和校验，任何错误都不会部分生效。

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use endo_core::migration::load_patients;
use endo_core::{AppSettings, Assistant, Doctor, EndoError, Patient, Result, SettingsPatch};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info};

/// 备份格式错误提示
pub const INVALID_BACKUP_MESSAGE: &str =
    "Invalid backup file format. Expected an object with patients, doctors, and assistants arrays.";

/// 导出用的数据快照（借用存储中的集合）
#[derive(Debug, Serialize)]
pub struct BackupSnapshot<'a> {
    pub patients: &'a [Patient],
    pub doctors: &'a [Doctor],
    pub assistants: &'a [Assistant],
    pub settings: &'a AppSettings,
}

/// 解析后的备份内容
#[derive(Debug, Clone)]
pub struct BackupDocument {
    pub patients: Vec<Patient>,
    pub doctors: Vec<Doctor>,
    pub assistants: Vec<Assistant>,
    /// 按部分合并方式应用
    pub settings: Option<SettingsPatch>,
}

/// 备份写出结果
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub path: PathBuf,
    pub size: u64,
    /// 文档内容的SHA-256
    pub sha256: String,
    pub patient_count: usize,
}

/// 默认备份文件名
pub fn default_backup_file_name(date: NaiveDate) -> String {
    format!("endoreport_backup_{}.json", date.format("%Y-%m-%d"))
}

/// 编码为带缩进的 JSON 文本
pub fn encode_backup(snapshot: &BackupSnapshot<'_>) -> Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// 计算文档的SHA-256十六进制摘要
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// 解析并校验备份文本
pub fn parse_backup(text: &str) -> Result<BackupDocument> {
    let mut root: Value = serde_json::from_str(text)?;

    let has_arrays = ["patients", "doctors", "assistants"]
        .iter()
        .all(|key| root.get(key).map_or(false, Value::is_array));
    if !has_arrays {
        return Err(EndoError::Format(INVALID_BACKUP_MESSAGE.to_string()));
    }

    let patients = load_patients(root["patients"].take())?;
    let doctors: Vec<Doctor> = serde_json::from_value(root["doctors"].take())?;
    let assistants: Vec<Assistant> = serde_json::from_value(root["assistants"].take())?;
    let settings = match root.get_mut("settings").map(Value::take) {
        Some(Value::Null) | None => None,
        Some(value) => Some(serde_json::from_value::<SettingsPatch>(value)?),
    };

    Ok(BackupDocument {
        patients,
        doctors,
        assistants,
        settings,
    })
}

/// 写出备份文件
pub async fn write_backup_file(path: &Path, snapshot: &BackupSnapshot<'_>) -> Result<BackupSummary> {
    let content = encode_backup(snapshot)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content.as_bytes()).await?;

    let summary = BackupSummary {
        path: path.to_path_buf(),
        size: content.len() as u64,
        sha256: content_digest(content.as_bytes()),
        patient_count: snapshot.patients.len(),
    };
    info!(
        "Backup written to {} (patients: {}, size: {} bytes, sha256: {})",
        summary.path.display(),
        summary.patient_count,
        summary.size,
        summary.sha256
    );
    Ok(summary)
}

/// 读取并解析备份文件
pub async fn read_backup_file(path: &Path) -> Result<BackupDocument> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_backup(&text).map_err(|e| {
        error!("Restore failed for {}: {}", path.display(), e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use endo_core::{default_assistants, default_doctors, Gender, Theme};
    use serde_json::json;

    fn sample_patient() -> Patient {
        Patient {
            id: "P1".to_string(),
            name: "Jane Doe".to_string(),
            age: 40,
            gender: Gender::Female,
            reports: Vec::new(),
        }
    }

    #[test]
    fn test_parse_requires_all_three_arrays() {
        let missing = json!({"patients": [], "doctors": []}).to_string();
        match parse_backup(&missing) {
            Err(EndoError::Format(message)) => assert_eq!(message, INVALID_BACKUP_MESSAGE),
            other => panic!("unexpected result: {:?}", other),
        }

        let wrong_type = json!({"patients": {}, "doctors": [], "assistants": []}).to_string();
        assert!(matches!(parse_backup(&wrong_type), Err(EndoError::Format(_))));

        assert!(matches!(parse_backup("not json"), Err(EndoError::Serialization(_))));
    }

    #[test]
    fn test_parse_reads_optional_settings() {
        let text = json!({
            "patients": [],
            "doctors": [{"id": "doc-1", "name": "Dr. A"}],
            "assistants": [],
            "settings": {"theme": "dark", "aiEnabled": false}
        })
        .to_string();

        let doc = parse_backup(&text).unwrap();
        assert_eq!(doc.doctors.len(), 1);
        let settings = doc.settings.unwrap();
        assert_eq!(settings.theme, Some(Theme::Dark));
        assert_eq!(settings.ai_enabled, Some(false));
        assert_eq!(settings.notifications_enabled, None);
    }

    #[tokio::test]
    async fn test_backup_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(default_backup_file_name(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(path.ends_with("endoreport_backup_2024-01-01.json"));

        let patients = vec![sample_patient()];
        let doctors = default_doctors();
        let assistants = default_assistants();
        let settings = AppSettings::default();
        let snapshot = BackupSnapshot {
            patients: &patients,
            doctors: &doctors,
            assistants: &assistants,
            settings: &settings,
        };

        let summary = write_backup_file(&path, &snapshot).await.unwrap();
        assert_eq!(summary.patient_count, 1);
        assert_eq!(summary.sha256.len(), 64);

        let doc = read_backup_file(&path).await.unwrap();
        assert_eq!(doc.patients, patients);
        assert_eq!(doc.doctors, doctors);
        assert!(doc.settings.is_some());
    }
}
