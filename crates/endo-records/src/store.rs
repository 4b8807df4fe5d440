//! 记录存储
//!
//! 患者、报告、医护人员和设置的唯一修改入口。每次修改先构建新的集合快照，整文档写入键值存储，
//! 写入成功后才替换内存中的集合；写入失败时内存状态保持调用前的值。
//!
//! 通过ID定位的修改操作在ID无法解析时静默不做任何事（只记录 debug 日志）。
//!
//! 加载时读取或解码失败的键使用默认值，但在整体恢复或清空之前拒绝增量写入，
//! 避免以默认值为基础的快照覆盖仍在磁盘上的数据。恢复和清空跨多个键写入，任一键写入失败时
//! 已写入的键回滚到原值。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use endo_core::migration::load_patients;
use endo_core::utils::{
    generate_id, is_valid_record_id, ASSISTANT_ID_PREFIX, DOCTOR_ID_PREFIX, PATIENT_ID_PREFIX,
    REPORT_ID_PREFIX,
};
use endo_core::{
    default_assistants, default_doctors, AiDiagnosis, AppSettings, Assistant, Doctor, EndoError,
    EndoscopyImage, NewPatient, NewReport, Patient, PatientPatch, Report, ReportPatch, Result,
    SettingsPatch,
};
use endo_storage::{keys, BackupDocument, BackupSnapshot, KeyValueStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::draft::{append_suggestion, new_image, validate_report_fields, ReportDraft};
use crate::state_machine::{DiagnosisEvent, DiagnosisStateMachine};

/// 默认界面语言
pub const DEFAULT_LOCALE: &str = "en";

/// 批量导入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
}

/// 弱引用解析结果：被引用的人员可能已被删除
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffRef<'a, T> {
    Resolved(&'a T),
    Missing(&'a str),
}

impl<'a, T> StaffRef<'a, T> {
    pub fn resolved(&self) -> Option<&'a T> {
        match self {
            StaffRef::Resolved(member) => Some(member),
            StaffRef::Missing(_) => None,
        }
    }
}

/// 记录存储
pub struct RecordStore {
    kv: Arc<dyn KeyValueStore>,
    /// 加载失败、禁止增量覆盖的键
    unreadable: HashSet<&'static str>,
    patients: Vec<Patient>,
    doctors: Vec<Doctor>,
    assistants: Vec<Assistant>,
    settings: AppSettings,
    authenticated: bool,
    locale: String,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("patients", &self.patients.len())
            .field("doctors", &self.doctors.len())
            .field("assistants", &self.assistants.len())
            .field("settings", &self.settings)
            .field("authenticated", &self.authenticated)
            .field("locale", &self.locale)
            .field("unreadable", &self.unreadable)
            .finish()
    }
}

impl RecordStore {
    /// 从键值存储加载全部集合
    ///
    /// 键不存在时使用默认值；读取或解析失败时记录错误并同样使用默认值，
    /// 同时把该键标记为不可增量覆盖，见 [`RecordStore::unreadable_keys`]。
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let mut unreadable = HashSet::new();
        let kv_ref = kv.as_ref();

        let patients = load_key(kv_ref, keys::PATIENTS, load_patients, &mut unreadable)
            .await
            .unwrap_or_default();
        let doctors = load_key(kv_ref, keys::DOCTORS, decode_json, &mut unreadable)
            .await
            .unwrap_or_else(default_doctors);
        let assistants = load_key(kv_ref, keys::ASSISTANTS, decode_json, &mut unreadable)
            .await
            .unwrap_or_else(default_assistants);
        let settings = load_key(kv_ref, keys::SETTINGS, decode_json, &mut unreadable)
            .await
            .unwrap_or_default();
        let authenticated = load_key(kv_ref, keys::AUTH, decode_json, &mut unreadable)
            .await
            .unwrap_or(false);
        let locale = load_key(kv_ref, keys::LOCALE, decode_json, &mut unreadable)
            .await
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        info!(
            "Record store loaded: {} patients, {} doctors, {} assistants",
            patients.len(),
            doctors.len(),
            assistants.len()
        );

        Self {
            kv,
            unreadable,
            patients,
            doctors,
            assistants,
            settings,
            authenticated,
            locale,
        }
    }

    // ---- 读取 ----

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn get_patient(&self, id: &str) -> Option<&Patient> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn get_report(&self, patient_id: &str, report_id: &str) -> Option<&Report> {
        self.get_patient(patient_id)?.report(report_id)
    }

    pub fn doctors(&self) -> &[Doctor] {
        &self.doctors
    }

    pub fn get_doctor(&self, id: &str) -> Option<&Doctor> {
        self.doctors.iter().find(|d| d.id == id)
    }

    pub fn assistants(&self) -> &[Assistant] {
        &self.assistants
    }

    pub fn get_assistant(&self, id: &str) -> Option<&Assistant> {
        self.assistants.iter().find(|a| a.id == id)
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// 加载失败的键；恢复或清空数据之前，针对这些键的增量修改返回 `Storage` 错误
    pub fn unreadable_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.unreadable.iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// 解析报告的内镜医生，已删除时返回 `None`
    pub fn resolve_endoscopist(&self, report: &Report) -> Option<&Doctor> {
        report.endoscopist_id.as_deref().and_then(|id| self.get_doctor(id))
    }

    /// 解析报告的助手列表，保留已删除人员的ID
    pub fn resolve_assistants<'a>(&'a self, report: &'a Report) -> Vec<StaffRef<'a, Assistant>> {
        report
            .assistant_ids
            .iter()
            .map(|id| match self.get_assistant(id) {
                Some(assistant) => StaffRef::Resolved(assistant),
                None => StaffRef::Missing(id.as_str()),
            })
            .collect()
    }

    /// 备份导出用快照
    pub fn snapshot(&self) -> BackupSnapshot<'_> {
        BackupSnapshot {
            patients: &self.patients,
            doctors: &self.doctors,
            assistants: &self.assistants,
            settings: &self.settings,
        }
    }

    // ---- 患者 ----

    /// 登记患者，ID已存在时拒绝
    pub async fn register_patient(&mut self, new_patient: NewPatient) -> Result<Patient> {
        let name = new_patient.name.trim();
        if name.is_empty() {
            return Err(EndoError::Validation("Patient name is required".to_string()));
        }

        let id = match new_patient.supplied_id() {
            Some(id) => {
                if !is_valid_record_id(id) {
                    return Err(EndoError::Validation(format!("Invalid patient ID: {}", id)));
                }
                if self.get_patient(id).is_some() {
                    return Err(EndoError::Validation(format!("Patient ID {} already exists", id)));
                }
                id.to_string()
            }
            None => generate_id(PATIENT_ID_PREFIX),
        };

        let patient = Patient {
            id,
            name: name.to_string(),
            age: new_patient.age,
            gender: new_patient.gender,
            reports: Vec::new(),
        };

        let mut patients = self.patients.clone();
        patients.push(patient.clone());
        self.commit_patients(patients).await?;

        info!("Registered patient {}", patient.id);
        Ok(patient)
    }

    /// 批量导入，跳过ID缺失、格式无效或重复的记录
    pub async fn import_patients(&mut self, new_patients: Vec<NewPatient>) -> Result<ImportSummary> {
        let total = new_patients.len();
        let mut seen: HashSet<String> = self.patients.iter().map(|p| p.id.clone()).collect();

        let accepted: Vec<Patient> = new_patients
            .into_iter()
            .filter_map(|p| {
                let id = p.supplied_id().filter(|id| is_valid_record_id(id))?.to_string();
                if !seen.insert(id.clone()) {
                    return None;
                }
                Some(Patient {
                    id,
                    name: p.name,
                    age: p.age,
                    gender: p.gender,
                    reports: Vec::new(),
                })
            })
            .collect();

        let summary = ImportSummary {
            added: accepted.len(),
            skipped: total - accepted.len(),
        };

        if !accepted.is_empty() {
            let mut patients = self.patients.clone();
            patients.extend(accepted);
            self.commit_patients(patients).await?;
        }

        if summary.skipped > 0 {
            warn!("Skipped {} duplicate or unidentified patients during import", summary.skipped);
        }
        info!("Imported {} patients", summary.added);
        Ok(summary)
    }

    /// 更新患者基本信息，ID不存在时不做任何事
    pub async fn update_patient(&mut self, id: &str, patch: PatientPatch) -> Result<()> {
        let Some(index) = self.patients.iter().position(|p| p.id == id) else {
            debug!("update_patient: patient {} not found", id);
            return Ok(());
        };

        let mut patients = self.patients.clone();
        patients[index].merge(patch);
        self.commit_patients(patients).await?;

        info!("Updated patient {}", id);
        Ok(())
    }

    /// 删除患者及其全部报告（一次写入）
    pub async fn delete_patient(&mut self, id: &str) -> Result<()> {
        if self.get_patient(id).is_none() {
            debug!("delete_patient: patient {} not found", id);
            return Ok(());
        }

        let patients = self.patients.iter().filter(|p| p.id != id).cloned().collect();
        self.commit_patients(patients).await?;

        info!("Deleted patient {}", id);
        Ok(())
    }

    // ---- 报告 ----

    /// 新增报告
    ///
    /// 患者不存在时返回生成的报告但不做任何修改。
    pub async fn add_report(&mut self, patient_id: &str, new_report: NewReport) -> Result<Report> {
        validate_report_fields(
            new_report.procedure_type,
            &new_report.findings,
            new_report.boston_bowel_prep_scale.as_ref(),
        )?;

        let report = new_report.into_report(generate_id(REPORT_ID_PREFIX));

        let Some(index) = self.patients.iter().position(|p| p.id == patient_id) else {
            debug!("add_report: patient {} not found, report {} dropped", patient_id, report.id);
            return Ok(report);
        };

        let mut patients = self.patients.clone();
        patients[index].reports.push(report.clone());
        self.commit_patients(patients).await?;

        info!("Added report {} for patient {}", report.id, patient_id);
        Ok(report)
    }

    /// 更新报告
    ///
    /// 检查类型变化时先套用新类型模板、清空分部位所见和麻醉医生，再合并其余字段。
    pub async fn update_report(&mut self, patient_id: &str, report_id: &str, patch: ReportPatch) -> Result<()> {
        let updated = self
            .modify_report(patient_id, report_id, |report| {
                let mut next = match patch.procedure_type {
                    Some(procedure_type) if procedure_type != report.procedure_type => {
                        let mut draft = ReportDraft::from_report(report);
                        draft.set_procedure_type(procedure_type);
                        draft.into_inner().into_report(report.id.clone())
                    }
                    _ => report.clone(),
                };
                next.merge(patch);
                validate_report_fields(
                    next.procedure_type,
                    &next.findings,
                    next.boston_bowel_prep_scale.as_ref(),
                )?;
                *report = next;
                Ok(())
            })
            .await?;

        if updated.is_some() {
            info!("Updated report {} for patient {}", report_id, patient_id);
        }
        Ok(())
    }

    /// 删除报告
    pub async fn delete_report(&mut self, patient_id: &str, report_id: &str) -> Result<()> {
        let Some((pi, _)) = self.locate_report(patient_id, report_id) else {
            debug!("delete_report: report {}/{} not found", patient_id, report_id);
            return Ok(());
        };

        let mut patients = self.patients.clone();
        patients[pi].reports.retain(|r| r.id != report_id);
        self.commit_patients(patients).await?;

        info!("Deleted report {} for patient {}", report_id, patient_id);
        Ok(())
    }

    // ---- 影像 ----

    /// 为已保存的报告上传影像
    pub async fn add_image(
        &mut self,
        patient_id: &str,
        report_id: &str,
        region: &str,
        image_data_url: String,
        label: String,
    ) -> Result<Option<EndoscopyImage>> {
        self.modify_report(patient_id, report_id, |report| {
            let image = new_image(report.procedure_type, region, image_data_url, label)?;
            report.images.push(image.clone());
            Ok(image)
        })
        .await
    }

    pub async fn update_image_label(
        &mut self,
        patient_id: &str,
        report_id: &str,
        image_id: &str,
        label: String,
    ) -> Result<()> {
        self.modify_image(patient_id, report_id, image_id, |image| {
            image.label = label;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub async fn remove_image(&mut self, patient_id: &str, report_id: &str, image_id: &str) -> Result<()> {
        if self.find_image(patient_id, report_id, image_id).is_none() {
            debug!("remove_image: image {} not found", image_id);
            return Ok(());
        }
        self.modify_report(patient_id, report_id, |report| {
            report.images.retain(|img| img.id != image_id);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub fn find_image(&self, patient_id: &str, report_id: &str, image_id: &str) -> Option<&EndoscopyImage> {
        self.get_report(patient_id, report_id)?.image(image_id)
    }

    /// 推进影像AI诊断状态并持久化，返回新状态
    pub async fn set_image_diagnosis(
        &mut self,
        patient_id: &str,
        report_id: &str,
        image_id: &str,
        event: DiagnosisEvent,
    ) -> Result<Option<AiDiagnosis>> {
        self.modify_image(patient_id, report_id, image_id, |image| {
            let next = DiagnosisStateMachine::new().transition(image.ai_diagnosis.as_ref(), event)?;
            image.ai_diagnosis = Some(next.clone());
            Ok(next)
        })
        .await
    }

    /// 把已得出的AI诊断追加到影像所在部位的所见，返回是否应用
    pub async fn apply_ai_suggestion(&mut self, patient_id: &str, report_id: &str, image_id: &str) -> Result<bool> {
        let Some(image) = self.find_image(patient_id, report_id, image_id) else {
            return Ok(false);
        };
        let Some(text) = image.ai_diagnosis.as_ref().and_then(AiDiagnosis::resolved_text) else {
            return Ok(false);
        };
        let region = image.region.clone();
        let text = text.to_string();

        let applied = self
            .modify_report(patient_id, report_id, |report| {
                if !report.procedure_type.has_region(&region) {
                    return Err(EndoError::Validation(format!(
                        "Region '{}' is not defined for {}",
                        region, report.procedure_type
                    )));
                }
                append_suggestion(&mut report.findings, &region, &text);
                Ok(())
            })
            .await?;
        Ok(applied.is_some())
    }

    // ---- 数据集 ----

    /// 整体替换全部集合，人员名单缺失时使用内置默认值
    pub async fn restore_data(
        &mut self,
        patients: Vec<Patient>,
        doctors: Option<Vec<Doctor>>,
        assistants: Option<Vec<Assistant>>,
    ) -> Result<()> {
        self.replace_dataset(patients, doctors, assistants, None).await
    }

    /// 从备份文档恢复，附带的设置按部分合并
    pub async fn restore_backup(&mut self, backup: BackupDocument) -> Result<()> {
        let settings = backup.settings.map(|patch| {
            let mut settings = self.settings.clone();
            settings.merge(patch);
            settings
        });
        self.replace_dataset(
            backup.patients,
            Some(backup.doctors),
            Some(backup.assistants),
            settings,
        )
        .await
    }

    /// 清空全部数据，人员名单和设置恢复默认
    pub async fn clear_all_data(&mut self) -> Result<()> {
        self.replace_dataset(Vec::new(), None, None, Some(AppSettings::default()))
            .await?;

        warn!("All clinical data cleared");
        Ok(())
    }

    /// 全有或全无地替换数据集
    async fn replace_dataset(
        &mut self,
        patients: Vec<Patient>,
        doctors: Option<Vec<Doctor>>,
        assistants: Option<Vec<Assistant>>,
        settings: Option<AppSettings>,
    ) -> Result<()> {
        let mut ids = HashSet::new();
        if let Some(duplicate) = patients.iter().find(|p| !ids.insert(p.id.clone())) {
            return Err(EndoError::Validation(format!(
                "Duplicate patient ID {} in restored data",
                duplicate.id
            )));
        }

        let doctors = doctors.unwrap_or_else(default_doctors);
        let assistants = assistants.unwrap_or_else(default_assistants);

        let mut entries = vec![
            (keys::PATIENTS, serde_json::to_value(&patients)?),
            (keys::DOCTORS, serde_json::to_value(&doctors)?),
            (keys::ASSISTANTS, serde_json::to_value(&assistants)?),
        ];
        if let Some(settings) = &settings {
            entries.push((keys::SETTINGS, serde_json::to_value(settings)?));
        }
        self.replace_keys(entries).await?;

        info!(
            "Restored data: {} patients, {} doctors, {} assistants",
            patients.len(),
            doctors.len(),
            assistants.len()
        );
        self.patients = patients;
        self.doctors = doctors;
        self.assistants = assistants;
        if let Some(settings) = settings {
            self.settings = settings;
        }
        Ok(())
    }

    // ---- 医护人员 ----

    pub async fn add_doctor(&mut self, name: &str) -> Result<Doctor> {
        let doctor = Doctor {
            id: generate_id(DOCTOR_ID_PREFIX),
            name: required_name(name, "Doctor")?,
        };
        let mut doctors = self.doctors.clone();
        doctors.push(doctor.clone());
        self.write(keys::DOCTORS, &doctors).await?;
        self.doctors = doctors;

        info!("Added doctor {}", doctor.id);
        Ok(doctor)
    }

    /// 删除医生，不级联到引用该医生的报告
    pub async fn delete_doctor(&mut self, id: &str) -> Result<()> {
        if self.get_doctor(id).is_none() {
            debug!("delete_doctor: doctor {} not found", id);
            return Ok(());
        }
        let doctors: Vec<Doctor> = self.doctors.iter().filter(|d| d.id != id).cloned().collect();
        self.write(keys::DOCTORS, &doctors).await?;
        self.doctors = doctors;

        info!("Deleted doctor {}", id);
        Ok(())
    }

    pub async fn add_assistant(&mut self, name: &str) -> Result<Assistant> {
        let assistant = Assistant {
            id: generate_id(ASSISTANT_ID_PREFIX),
            name: required_name(name, "Assistant")?,
        };
        let mut assistants = self.assistants.clone();
        assistants.push(assistant.clone());
        self.write(keys::ASSISTANTS, &assistants).await?;
        self.assistants = assistants;

        info!("Added assistant {}", assistant.id);
        Ok(assistant)
    }

    /// 删除助手，不级联到引用该助手的报告
    pub async fn delete_assistant(&mut self, id: &str) -> Result<()> {
        if self.get_assistant(id).is_none() {
            debug!("delete_assistant: assistant {} not found", id);
            return Ok(());
        }
        let assistants: Vec<Assistant> = self.assistants.iter().filter(|a| a.id != id).cloned().collect();
        self.write(keys::ASSISTANTS, &assistants).await?;
        self.assistants = assistants;

        info!("Deleted assistant {}", id);
        Ok(())
    }

    // ---- 设置与会话 ----

    /// 浅合并设置
    pub async fn update_settings(&mut self, patch: SettingsPatch) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.merge(patch);
        self.write(keys::SETTINGS, &settings).await?;
        self.settings = settings;
        Ok(())
    }

    /// 记录同步时间
    pub async fn sync_data(&mut self) -> Result<()> {
        self.update_settings(SettingsPatch {
            last_synced: Some(Some(Utc::now())),
            ..Default::default()
        })
        .await?;
        info!("Data synchronized at {:?}", self.settings.last_synced);
        Ok(())
    }

    pub async fn login(&mut self) -> Result<()> {
        self.set_authenticated(true).await
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.set_authenticated(false).await
    }

    async fn set_authenticated(&mut self, authenticated: bool) -> Result<()> {
        self.replace_keys(vec![(keys::AUTH, Value::Bool(authenticated))])
            .await?;
        self.authenticated = authenticated;
        Ok(())
    }

    pub async fn set_locale(&mut self, locale: &str) -> Result<()> {
        let locale = locale.trim();
        if locale.is_empty() {
            return Err(EndoError::Validation("Locale must not be empty".to_string()));
        }
        self.replace_keys(vec![(keys::LOCALE, Value::String(locale.to_string()))])
            .await?;
        self.locale = locale.to_string();
        Ok(())
    }

    // ---- 内部 ----

    fn locate_report(&self, patient_id: &str, report_id: &str) -> Option<(usize, usize)> {
        let pi = self.patients.iter().position(|p| p.id == patient_id)?;
        let ri = self.patients[pi].reports.iter().position(|r| r.id == report_id)?;
        Some((pi, ri))
    }

    /// 在新快照上修改单个报告并持久化；ID无法解析时返回 `Ok(None)`
    async fn modify_report<T, F>(&mut self, patient_id: &str, report_id: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Report) -> Result<T>,
    {
        let Some((pi, ri)) = self.locate_report(patient_id, report_id) else {
            debug!("Report {}/{} not found", patient_id, report_id);
            return Ok(None);
        };

        let mut patients = self.patients.clone();
        let output = f(&mut patients[pi].reports[ri])?;
        self.commit_patients(patients).await?;
        Ok(Some(output))
    }

    async fn modify_image<T, F>(
        &mut self,
        patient_id: &str,
        report_id: &str,
        image_id: &str,
        f: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&mut EndoscopyImage) -> Result<T>,
    {
        if self.find_image(patient_id, report_id, image_id).is_none() {
            debug!("Image {} not found in report {}/{}", image_id, patient_id, report_id);
            return Ok(None);
        }
        self.modify_report(patient_id, report_id, |report| match report.image_mut(image_id) {
            Some(image) => f(image),
            None => Err(EndoError::Internal(format!("Image {} vanished", image_id))),
        })
        .await
    }

    async fn commit_patients(&mut self, patients: Vec<Patient>) -> Result<()> {
        self.write(keys::PATIENTS, &patients).await?;
        self.patients = patients;
        Ok(())
    }

    /// 增量写入单个键，加载失败的键拒绝写入
    async fn write<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) -> Result<()> {
        if self.unreadable.contains(key) {
            error!("Refusing to overwrite unreadable key \"{}\"", key);
            return Err(EndoError::Storage(format!(
                "Stored data under \"{}\" could not be loaded; restore a backup or clear data first",
                key
            )));
        }
        let value = serde_json::to_value(value)?;
        self.kv.set(key, &value).await.map_err(|e| {
            error!("Error writing to key \"{}\": {}", key, e);
            e
        })
    }

    /// 整体覆盖若干键
    ///
    /// 不依赖已加载的内容，因此也可以覆盖加载失败的键。任一键写入失败时，
    /// 已写入的键恢复为写入前的值（原本不存在则删除）。
    async fn replace_keys(&mut self, entries: Vec<(&'static str, Value)>) -> Result<()> {
        // 最后一个键写入失败时无需回滚它自己
        let mut previous = Vec::with_capacity(entries.len());
        for (key, _) in entries.iter().take(entries.len().saturating_sub(1)) {
            previous.push((*key, self.kv.get(key).await?));
        }

        for (written, (key, value)) in entries.iter().enumerate() {
            if let Err(e) = self.kv.set(key, value).await {
                error!("Error writing to key \"{}\": {}", key, e);
                self.roll_back(&previous[..written]).await;
                return Err(e);
            }
        }

        for (key, _) in &entries {
            self.unreadable.remove(key);
        }
        Ok(())
    }

    async fn roll_back(&self, previous: &[(&'static str, Option<Value>)]) {
        for (key, value) in previous.iter().rev() {
            let result = match value {
                Some(value) => self.kv.set(key, value).await,
                None => self.kv.remove(key).await,
            };
            match result {
                Ok(()) => warn!("Rolled back key \"{}\"", key),
                Err(e) => error!("Failed to roll back key \"{}\": {}", key, e),
            }
        }
    }
}

fn required_name(name: &str, role: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EndoError::Validation(format!("{} name is required", role)));
    }
    Ok(name.to_string())
}

/// 读取并解码一个键；键不存在时返回 `None`，失败时记录错误并标记该键
async fn load_key<T>(
    kv: &dyn KeyValueStore,
    key: &'static str,
    decode: fn(Value) -> Result<T>,
    unreadable: &mut HashSet<&'static str>,
) -> Option<T> {
    let loaded = match kv.get(key).await {
        Ok(None) => return None,
        Ok(Some(value)) => decode(value),
        Err(e) => Err(e),
    };
    match loaded {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            error!("Error loading key \"{}\", keeping stored data untouched: {}", key, e);
            unreadable.insert(key);
            None
        }
    }
}

fn decode_json<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
