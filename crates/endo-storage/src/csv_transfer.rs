//! 患者CSV导入导出
//!
//! 四列 `id,name,age,gender`，姓名加双引号。导入时跳过表头，缺少ID或姓名、年龄非数字、
//! 性别无效的行在进入存储唯一性检查之前被静默丢弃。

use std::path::Path;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use endo_core::{Gender, NewPatient, Patient, Result};
use tracing::{debug, info, warn};

/// 表头
pub const CSV_HEADER: &str = "id,name,age,gender";

/// CSV解析结果
#[derive(Debug, Clone, Default)]
pub struct CsvImport {
    /// 通过行级过滤的患者
    pub patients: Vec<NewPatient>,
    /// 被丢弃的行数（不含空行）
    pub dropped: usize,
}

/// 默认导出文件名
pub fn default_csv_file_name(date: NaiveDate) -> String {
    format!("endoreport_patients_{}.csv", date.format("%Y-%m-%d"))
}

/// 导出患者为CSV文本
pub fn export_patients_csv(patients: &[Patient]) -> String {
    let mut lines = Vec::with_capacity(patients.len() + 1);
    lines.push(CSV_HEADER.to_string());
    lines.extend(patients.iter().map(|p| {
        format!("{},\"{}\",{},{}", p.id, p.name.replace('"', "\"\""), p.age, p.gender)
    }));
    lines.join("\n")
}

/// 解析CSV文本，无效行直接丢弃
pub fn parse_patients_csv(text: &str) -> CsvImport {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut import = CsvImport::default();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping unreadable CSV row {}: {}", index + 2, e);
                import.dropped += 1;
                continue;
            }
        };
        if record.iter().all(str::is_empty) {
            continue;
        }
        match parse_row(&record) {
            Some(patient) => import.patients.push(patient),
            None => {
                debug!("Dropping invalid CSV row {}: {:?}", index + 2, record);
                import.dropped += 1;
            }
        }
    }

    info!(
        "Parsed patient CSV: {} accepted, {} dropped",
        import.patients.len(),
        import.dropped
    );
    import
}

fn parse_row(record: &StringRecord) -> Option<NewPatient> {
    let id = record.get(0).filter(|id| !id.is_empty())?;
    let name = record.get(1).map(|name| name.replace('"', ""))?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let age = record.get(2)?.parse::<u32>().ok()?;
    let gender = record.get(3)?.parse::<Gender>().ok()?;
    Some(NewPatient::new(id, name, age, gender))
}

/// 读取CSV文件
pub async fn read_patients_csv(path: &Path) -> Result<CsvImport> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_patients_csv(&text))
}

/// 写出CSV文件
pub async fn write_patients_csv(path: &Path, patients: &[Patient]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, export_patients_csv(patients)).await?;
    info!("Exported {} patients to {}", patients.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_quotes_name() {
        let patients = vec![Patient {
            id: "P1".to_string(),
            name: "Jane Doe".to_string(),
            age: 40,
            gender: Gender::Female,
            reports: Vec::new(),
        }];
        assert_eq!(export_patients_csv(&patients), "id,name,age,gender\nP1,\"Jane Doe\",40,Female");
        assert_eq!(export_patients_csv(&[]), CSV_HEADER);
    }

    #[test]
    fn test_import_filters_invalid_rows() {
        let text = "id,name,age,gender\n\
                    P1,\"Jane Doe\",40,Female\n\
                    ,\"No Id\",30,Male\n\
                    P3,,30,Male\n\
                    P4,\"Bad Age\",forty,Male\n\
                    P5,\"Bad Gender\",30,Unknown\n\
                    P6,\"Doe, John\",51,male\n\
                    P7,\"Short\"\n\
                    \n";

        let import = parse_patients_csv(text);
        let ids: Vec<_> = import.patients.iter().filter_map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["P1".to_string(), "P6".to_string()]);
        assert_eq!(import.dropped, 5);
        assert_eq!(import.patients[1].name, "Doe, John");
        assert_eq!(import.patients[1].gender, Gender::Male);
    }

    #[tokio::test]
    async fn test_csv_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(default_csv_file_name(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        let patients = vec![Patient {
            id: "P9".to_string(),
            name: "Sok Dara".to_string(),
            age: 63,
            gender: Gender::Male,
            reports: Vec::new(),
        }];

        write_patients_csv(&path, &patients).await.unwrap();
        let import = read_patients_csv(&path).await.unwrap();
        assert_eq!(import.patients, vec![NewPatient::new("P9", "Sok Dara", 63, Gender::Male)]);
        assert_eq!(import.dropped, 0);
    }
}
