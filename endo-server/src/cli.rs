//! 子命令定义与处理

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Local, NaiveDate};
use clap::Subcommand;
use endo_admin::EndoConfig;
use endo_core::{
    AiDiagnosis, BowelPrepScale, Gender, NewPatient, PatientPatch, ProcedureType, Report,
    ReportPatch, SettingsPatch, Theme,
};
use endo_integration::{CommandProvider, DiagnosisCoordinator};
use endo_records::{RecordStore, ReportDraft, StaffRef};
use endo_storage::{
    default_backup_file_name, default_csv_file_name, read_backup_file, read_patients_csv,
    write_backup_file, write_patients_csv,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 患者管理
    #[command(subcommand)]
    Patient(PatientCommand),
    /// 检查报告管理
    #[command(subcommand)]
    Report(ReportCommand),
    /// 报告影像与AI诊断
    #[command(subcommand)]
    Image(ImageCommand),
    /// 内镜医生名单
    #[command(subcommand)]
    Doctor(StaffCommand),
    /// 助手名单
    #[command(subcommand)]
    Assistant(StaffCommand),
    /// 从CSV批量导入患者
    ImportCsv { path: PathBuf },
    /// 导出患者为CSV
    ExportCsv { path: Option<PathBuf> },
    /// 导出完整备份
    Backup { path: Option<PathBuf> },
    /// 从备份恢复（整体替换）
    Restore { path: PathBuf },
    /// 清空全部数据
    Clear {
        /// 确认清空
        #[arg(long)]
        yes: bool,
    },
    /// 查看或修改应用设置
    Settings {
        #[arg(long)]
        theme: Option<Theme>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long)]
        ai: Option<bool>,
    },
    /// 记录同步时间
    Sync,
    Login,
    Logout,
    /// 查看或设置界面语言
    Locale { value: Option<String> },
    /// 列出检查类型的部位键
    Regions { procedure_type: ProcedureType },
}

#[derive(Subcommand, Debug)]
pub enum PatientCommand {
    /// 登记患者
    Add {
        /// 不填时自动生成
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        gender: Gender,
    },
    List,
    Show { id: String },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<Gender>,
    },
    /// 删除患者及其全部报告
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// 按检查类型模板新建报告
    Add {
        patient_id: String,
        #[arg(long = "type")]
        procedure_type: ProcedureType,
        /// 检查日期，默认今天
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        diagnosis: Option<String>,
        /// 部位所见，格式 `region=text`，可重复
        #[arg(long = "finding", value_parser = parse_finding)]
        findings: Vec<(String, String)>,
        /// 默认名单第一位医生
        #[arg(long)]
        endoscopist: Option<String>,
        #[arg(long = "assistant")]
        assistants: Vec<String>,
        #[arg(long)]
        anesthetist: Option<String>,
        #[arg(long)]
        indication: Option<String>,
        #[arg(long)]
        recommendation: Option<String>,
        /// 波士顿肠道准备评分，格式 `right,transverse,left`
        #[arg(long, value_parser = parse_bbps)]
        bbps: Option<BowelPrepScale>,
    },
    Show {
        patient_id: String,
        report_id: String,
    },
    /// 修改报告；切换检查类型会重置模板和部位所见
    Update {
        patient_id: String,
        report_id: String,
        #[arg(long = "type")]
        procedure_type: Option<ProcedureType>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        diagnosis: Option<String>,
        #[arg(long = "finding", value_parser = parse_finding)]
        findings: Vec<(String, String)>,
        #[arg(long)]
        endoscopist: Option<String>,
        /// 给出时替换整个助手列表
        #[arg(long = "assistant")]
        assistants: Vec<String>,
        #[arg(long, value_parser = parse_bbps)]
        bbps: Option<BowelPrepScale>,
    },
    Delete {
        patient_id: String,
        report_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// 上传影像文件
    Add {
        patient_id: String,
        report_id: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "")]
        label: String,
    },
    Label {
        patient_id: String,
        report_id: String,
        image_id: String,
        label: String,
    },
    Remove {
        patient_id: String,
        report_id: String,
        image_id: String,
    },
    /// 请求AI诊断并等待结果
    Diagnose {
        patient_id: String,
        report_id: String,
        image_id: String,
    },
    /// 把AI诊断追加到部位所见
    Apply {
        patient_id: String,
        report_id: String,
        image_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum StaffCommand {
    Add { name: String },
    List,
    /// 删除人员，已有报告中的引用保留
    Delete { id: String },
}

pub async fn run(command: Command, mut store: RecordStore, config: &EndoConfig) -> Result<()> {
    match command {
        Command::Patient(cmd) => patient(&mut store, cmd).await,
        Command::Report(cmd) => report(&mut store, cmd).await,
        Command::Image(cmd) => image(store, config, cmd).await,
        Command::Doctor(cmd) => doctor(&mut store, cmd).await,
        Command::Assistant(cmd) => assistant(&mut store, cmd).await,
        Command::ImportCsv { path } => {
            let import = read_patients_csv(&path).await?;
            let summary = store.import_patients(import.patients).await?;
            println!(
                "Imported {} patients, skipped {} duplicates, dropped {} invalid rows",
                summary.added, summary.skipped, import.dropped
            );
            Ok(())
        }
        Command::ExportCsv { path } => {
            let path = path.unwrap_or_else(|| config.export_dir().join(default_csv_file_name(today())));
            write_patients_csv(&path, store.patients()).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Backup { path } => {
            let path = path.unwrap_or_else(|| config.export_dir().join(default_backup_file_name(today())));
            let summary = write_backup_file(&path, &store.snapshot()).await?;
            println!("{}  {}", summary.sha256, summary.path.display());
            Ok(())
        }
        Command::Restore { path } => {
            let backup = read_backup_file(&path).await?;
            store.restore_backup(backup).await?;
            println!(
                "Restored {} patients, {} doctors, {} assistants",
                store.patients().len(),
                store.doctors().len(),
                store.assistants().len()
            );
            Ok(())
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear all data without --yes");
            }
            store.clear_all_data().await?;
            Ok(())
        }
        Command::Settings {
            theme,
            notifications,
            ai,
        } => {
            if theme.is_some() || notifications.is_some() || ai.is_some() {
                store
                    .update_settings(SettingsPatch {
                        theme,
                        notifications_enabled: notifications,
                        ai_enabled: ai,
                        last_synced: None,
                    })
                    .await?;
            }
            print_json(store.settings())
        }
        Command::Sync => {
            store.sync_data().await?;
            print_json(store.settings())
        }
        Command::Login => Ok(store.login().await?),
        Command::Logout => Ok(store.logout().await?),
        Command::Locale { value } => {
            if let Some(locale) = value {
                store.set_locale(&locale).await?;
            }
            println!("{}", store.locale());
            Ok(())
        }
        Command::Regions { procedure_type } => {
            for region in procedure_type.regions() {
                println!("{}", region);
            }
            Ok(())
        }
    }
}

async fn patient(store: &mut RecordStore, cmd: PatientCommand) -> Result<()> {
    match cmd {
        PatientCommand::Add { id, name, age, gender } => {
            let patient = store
                .register_patient(NewPatient { id, name, age, gender })
                .await?;
            println!("{}", patient.id);
        }
        PatientCommand::List => {
            for p in store.patients() {
                println!("{}\t{}\t{}\t{}\t{} reports", p.id, p.name, p.age, p.gender, p.reports.len());
            }
        }
        PatientCommand::Show { id } => {
            let patient = store
                .get_patient(&id)
                .with_context(|| format!("Patient {} not found", id))?;
            println!("{}\t{}\t{}\t{}", patient.id, patient.name, patient.age, patient.gender);
            for r in &patient.reports {
                println!("  {}\t{}\t{}\t{}", r.id, r.procedure_date, r.procedure_type, r.diagnosis);
            }
        }
        PatientCommand::Update { id, name, age, gender } => {
            ensure_patient(store, &id)?;
            store.update_patient(&id, PatientPatch { name, age, gender }).await?;
        }
        PatientCommand::Delete { id } => {
            ensure_patient(store, &id)?;
            store.delete_patient(&id).await?;
            info!("Patient {} and all reports removed", id);
        }
    }
    Ok(())
}

async fn report(store: &mut RecordStore, cmd: ReportCommand) -> Result<()> {
    match cmd {
        ReportCommand::Add {
            patient_id,
            procedure_type,
            date,
            diagnosis,
            findings,
            endoscopist,
            assistants,
            anesthetist,
            indication,
            recommendation,
            bbps,
        } => {
            ensure_patient(store, &patient_id)?;
            let mut draft = ReportDraft::new(procedure_type, date.unwrap_or_else(today), store.doctors());
            for (region, text) in findings {
                draft.set_finding(&region, text)?;
            }
            for assistant in &assistants {
                draft.toggle_assistant(assistant, true);
            }
            let fields = draft.report_mut();
            if let Some(diagnosis) = diagnosis {
                fields.diagnosis = diagnosis;
            }
            if endoscopist.is_some() {
                fields.endoscopist_id = endoscopist;
            }
            if anesthetist.is_some() {
                fields.anesthetist_name = anesthetist;
            }
            if indication.is_some() {
                fields.indication = indication;
            }
            if recommendation.is_some() {
                fields.recommendation = recommendation;
            }
            if bbps.is_some() {
                fields.boston_bowel_prep_scale = bbps;
            }

            let report = store.add_report(&patient_id, draft.into_new_report()?).await?;
            println!("{}", report.id);
        }
        ReportCommand::Show {
            patient_id,
            report_id,
        } => {
            let report = find_report(store, &patient_id, &report_id)?;
            print_json(&ReportView::new(store, report))?;
        }
        ReportCommand::Update {
            patient_id,
            report_id,
            procedure_type,
            date,
            diagnosis,
            findings,
            endoscopist,
            assistants,
            bbps,
        } => {
            let current = find_report(store, &patient_id, &report_id)?;
            let findings = if findings.is_empty() {
                None
            } else {
                let mut merged = match procedure_type {
                    Some(t) if t != current.procedure_type => BTreeMap::new(),
                    _ => current.findings.clone(),
                };
                merged.extend(findings);
                Some(merged)
            };
            let patch = ReportPatch {
                procedure_date: date,
                procedure_type,
                diagnosis,
                findings,
                endoscopist_id: endoscopist,
                assistant_ids: (!assistants.is_empty()).then_some(assistants),
                boston_bowel_prep_scale: bbps,
                ..Default::default()
            };
            store.update_report(&patient_id, &report_id, patch).await?;
        }
        ReportCommand::Delete {
            patient_id,
            report_id,
        } => {
            find_report(store, &patient_id, &report_id)?;
            store.delete_report(&patient_id, &report_id).await?;
        }
    }
    Ok(())
}

async fn image(mut store: RecordStore, config: &EndoConfig, cmd: ImageCommand) -> Result<()> {
    match cmd {
        ImageCommand::Add {
            patient_id,
            report_id,
            region,
            file,
            label,
        } => {
            find_report(&store, &patient_id, &report_id)?;
            let data_url = read_data_url(&file).await?;
            let image = store
                .add_image(&patient_id, &report_id, &region, data_url, label)
                .await?
                .context("Report disappeared while adding image")?;
            println!("{}", image.id);
        }
        ImageCommand::Label {
            patient_id,
            report_id,
            image_id,
            label,
        } => {
            find_image(&store, &patient_id, &report_id, &image_id)?;
            store
                .update_image_label(&patient_id, &report_id, &image_id, label)
                .await?;
        }
        ImageCommand::Remove {
            patient_id,
            report_id,
            image_id,
        } => {
            find_image(&store, &patient_id, &report_id, &image_id)?;
            store.remove_image(&patient_id, &report_id, &image_id).await?;
        }
        ImageCommand::Apply {
            patient_id,
            report_id,
            image_id,
        } => {
            find_image(&store, &patient_id, &report_id, &image_id)?;
            if !store.apply_ai_suggestion(&patient_id, &report_id, &image_id).await? {
                bail!("Image {} has no AI diagnosis to apply", image_id);
            }
        }
        ImageCommand::Diagnose {
            patient_id,
            report_id,
            image_id,
        } => diagnose(store, config, &patient_id, &report_id, &image_id).await?,
    }
    Ok(())
}

async fn diagnose(
    store: RecordStore,
    config: &EndoConfig,
    patient_id: &str,
    report_id: &str,
    image_id: &str,
) -> Result<()> {
    if !config.ai.enabled {
        bail!("AI diagnosis is disabled in the configuration");
    }
    let command = config
        .ai
        .command
        .as_deref()
        .context("No AI command configured (set ai.command)")?;
    let provider = Arc::new(CommandProvider::from_command_line(command)?);

    let coordinator = DiagnosisCoordinator::new(Arc::new(RwLock::new(store)), provider)
        .with_timeout(config.request_timeout());
    coordinator.submit(patient_id, report_id, image_id).await?;

    match coordinator.wait(patient_id, report_id, image_id).await {
        Some(AiDiagnosis::Resolved(text)) => {
            println!("{}", text);
            Ok(())
        }
        Some(AiDiagnosis::Failed) => bail!("AI diagnosis failed for image {}", image_id),
        other => bail!("AI diagnosis did not complete: {:?}", other),
    }
}

async fn doctor(store: &mut RecordStore, cmd: StaffCommand) -> Result<()> {
    match cmd {
        StaffCommand::Add { name } => println!("{}", store.add_doctor(&name).await?.id),
        StaffCommand::List => {
            for d in store.doctors() {
                println!("{}\t{}", d.id, d.name);
            }
        }
        StaffCommand::Delete { id } => {
            store.get_doctor(&id).with_context(|| format!("Doctor {} not found", id))?;
            store.delete_doctor(&id).await?;
        }
    }
    Ok(())
}

async fn assistant(store: &mut RecordStore, cmd: StaffCommand) -> Result<()> {
    match cmd {
        StaffCommand::Add { name } => println!("{}", store.add_assistant(&name).await?.id),
        StaffCommand::List => {
            for a in store.assistants() {
                println!("{}\t{}", a.id, a.name);
            }
        }
        StaffCommand::Delete { id } => {
            store
                .get_assistant(&id)
                .with_context(|| format!("Assistant {} not found", id))?;
            store.delete_assistant(&id).await?;
        }
    }
    Ok(())
}

/// 报告输出视图，附带人员姓名和BBPS总分
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportView<'a> {
    #[serde(flatten)]
    report: &'a Report,
    endoscopist_name: Option<&'a str>,
    assistant_names: Vec<String>,
    bowel_prep_total: Option<u8>,
}

impl<'a> ReportView<'a> {
    fn new(store: &'a RecordStore, report: &'a Report) -> Self {
        let assistant_names = store
            .resolve_assistants(report)
            .into_iter()
            .map(|entry| match entry {
                StaffRef::Resolved(a) => a.name.clone(),
                StaffRef::Missing(id) => format!("{} (removed)", id),
            })
            .collect();
        Self {
            report,
            endoscopist_name: store.resolve_endoscopist(report).map(|d| d.name.as_str()),
            assistant_names,
            bowel_prep_total: report.bowel_prep_total(),
        }
    }
}

fn ensure_patient(store: &RecordStore, id: &str) -> Result<()> {
    store
        .get_patient(id)
        .map(|_| ())
        .with_context(|| format!("Patient {} not found", id))
}

fn find_report<'a>(store: &'a RecordStore, patient_id: &str, report_id: &str) -> Result<&'a Report> {
    store
        .get_report(patient_id, report_id)
        .with_context(|| format!("Report {} not found for patient {}", report_id, patient_id))
}

fn find_image(store: &RecordStore, patient_id: &str, report_id: &str, image_id: &str) -> Result<()> {
    store
        .find_image(patient_id, report_id, image_id)
        .map(|_| ())
        .with_context(|| format!("Image {} not found in report {}", image_id, report_id))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// 读取影像文件并编码为 data URL
async fn read_data_url(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(format!("data:{};base64,{}", image_mime_type(path), STANDARD.encode(bytes)))
}

fn image_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

fn parse_finding(s: &str) -> std::result::Result<(String, String), String> {
    let (region, text) = s
        .split_once('=')
        .ok_or_else(|| format!("expected region=text, got '{}'", s))?;
    let region = region.trim();
    if region.is_empty() {
        return Err("region must not be empty".to_string());
    }
    Ok((region.to_string(), text.trim().to_string()))
}

fn parse_bbps(s: &str) -> std::result::Result<BowelPrepScale, String> {
    let scores = s
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid score in '{}': {}", s, e))?;
    match scores.as_slice() {
        [right, transverse, left] => {
            BowelPrepScale::new(*right, *transverse, *left).map_err(|e| e.to_string())
        }
        _ => Err(format!("expected right,transverse,left, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    #[test]
    fn test_parse_finding() {
        assert_eq!(
            parse_finding("rectum= Small polyp ").unwrap(),
            ("rectum".to_string(), "Small polyp".to_string())
        );
        assert!(parse_finding("rectum").is_err());
        assert!(parse_finding("=x").is_err());
    }

    #[test]
    fn test_parse_bbps() {
        assert_eq!(parse_bbps("3, 2,3").unwrap().total(), 8);
        assert!(parse_bbps("3,2").is_err());
        assert!(parse_bbps("4,2,3").is_err());
        assert!(parse_bbps("a,b,c").is_err());
    }

    #[test]
    fn test_mime_type_from_extension() {
        assert_eq!(image_mime_type(Path::new("scope.PNG")), "image/png");
        assert_eq!(image_mime_type(Path::new("scope.jpg")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("scope")), "image/jpeg");
    }

    #[test]
    fn test_report_add_arguments() {
        let cli = TestCli::try_parse_from([
            "endoreport",
            "report",
            "add",
            "P1",
            "--type",
            "colonoscopy",
            "--date",
            "2024-01-01",
            "--finding",
            "rectum=Polyp",
            "--assistant",
            "asst-1",
            "--bbps",
            "3,2,3",
        ])
        .unwrap();

        match cli.command {
            Command::Report(ReportCommand::Add {
                procedure_type,
                findings,
                assistants,
                bbps,
                ..
            }) => {
                assert_eq!(procedure_type, ProcedureType::Colonoscopy);
                assert_eq!(findings, vec![("rectum".to_string(), "Polyp".to_string())]);
                assert_eq!(assistants, vec!["asst-1".to_string()]);
                assert_eq!(bbps.map(|b| b.total()), Some(8));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_report_through_cli() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(endo_storage::FileStore::new(dir.path()));
        let config = EndoConfig::default();

        let store = RecordStore::load(kv.clone()).await;
        let cli = TestCli::try_parse_from([
            "endoreport", "patient", "add", "--id", "P1", "--name", "Jane Doe", "--age", "40", "--gender", "female",
        ])
        .unwrap();
        run(cli.command, store, &config).await.unwrap();

        let store = RecordStore::load(kv.clone()).await;
        let cli = TestCli::try_parse_from([
            "endoreport", "report", "add", "P1", "--type", "gastroscopy", "--finding", "gej=Hiatus hernia",
        ])
        .unwrap();
        run(cli.command, store, &config).await.unwrap();

        let store = RecordStore::load(kv).await;
        let report = &store.get_patient("P1").unwrap().reports[0];
        assert_eq!(report.findings["gej"], "Hiatus hernia");
        assert_eq!(report.findings["esophagus"], "Normal");
        assert_eq!(report.endoscopist_id.as_deref(), Some("doc-1"));
    }
}
