//! 核心数据模型定义
//!
//! 所有结构体以 camelCase 序列化，与已持久化的 JSON 文档保持兼容。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EndoError, Result};

/// 性别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = EndoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(EndoError::Validation(format!("Invalid gender: {}", other))),
        }
    }
}

/// 检查类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcedureType {
    Gastroscopy,
    Colonoscopy,
    #[serde(rename = "ERCP")]
    Ercp,
    #[serde(rename = "EUS")]
    Eus,
    Cholangioscopy,
    Enteroscopy,
}

impl ProcedureType {
    pub const ALL: [ProcedureType; 6] = [
        ProcedureType::Gastroscopy,
        ProcedureType::Colonoscopy,
        ProcedureType::Ercp,
        ProcedureType::Eus,
        ProcedureType::Cholangioscopy,
        ProcedureType::Enteroscopy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureType::Gastroscopy => "Gastroscopy",
            ProcedureType::Colonoscopy => "Colonoscopy",
            ProcedureType::Ercp => "ERCP",
            ProcedureType::Eus => "EUS",
            ProcedureType::Cholangioscopy => "Cholangioscopy",
            ProcedureType::Enteroscopy => "Enteroscopy",
        }
    }

    /// 是否支持波士顿肠道准备评分
    pub fn supports_bowel_prep(&self) -> bool {
        matches!(self, ProcedureType::Colonoscopy)
    }
}

impl fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcedureType {
    type Err = EndoError;

    fn from_str(s: &str) -> Result<Self> {
        ProcedureType::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EndoError::Validation(format!("Unknown procedure type: {}", s)))
    }
}

/// 麻醉方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnesthesiaType {
    #[serde(rename = "General Anesthesia")]
    General,
    #[serde(rename = "Monitored Anesthesia Care (MAC)")]
    Mac,
    #[serde(rename = "Conscious Sedation")]
    ConsciousSedation,
    #[serde(rename = "None")]
    None,
}

/// 患者就诊状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatientStatus {
    Outpatient,
    Inpatient,
    Emergency,
}

/// 结肠分段（波士顿评分）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColonSegment {
    Right,
    Transverse,
    Left,
}

/// 单段评分上限
pub const BOWEL_PREP_SEGMENT_MAX: u8 = 3;

/// 波士顿肠道准备评分 (BBPS)
///
/// 三段评分均在 `0..=3` 范围内，总分始终由三段求和得出，不单独存储。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBowelPrepScale")]
pub struct BowelPrepScale {
    right: u8,
    transverse: u8,
    left: u8,
}

#[derive(Deserialize)]
struct RawBowelPrepScale {
    right: u8,
    transverse: u8,
    left: u8,
}

impl TryFrom<RawBowelPrepScale> for BowelPrepScale {
    type Error = EndoError;

    fn try_from(raw: RawBowelPrepScale) -> Result<Self> {
        BowelPrepScale::new(raw.right, raw.transverse, raw.left)
    }
}

impl BowelPrepScale {
    pub fn new(right: u8, transverse: u8, left: u8) -> Result<Self> {
        for (segment, score) in [("right", right), ("transverse", transverse), ("left", left)] {
            check_segment_score(segment, score)?;
        }
        Ok(Self { right, transverse, left })
    }

    /// 满分评分（3+3+3），结肠镜模板默认值
    pub fn excellent() -> Self {
        Self { right: 3, transverse: 3, left: 3 }
    }

    pub fn right(&self) -> u8 {
        self.right
    }

    pub fn transverse(&self) -> u8 {
        self.transverse
    }

    pub fn left(&self) -> u8 {
        self.left
    }

    pub fn segment(&self, segment: ColonSegment) -> u8 {
        match segment {
            ColonSegment::Right => self.right,
            ColonSegment::Transverse => self.transverse,
            ColonSegment::Left => self.left,
        }
    }

    /// 修改单段评分
    pub fn set_segment(&mut self, segment: ColonSegment, score: u8) -> Result<()> {
        check_segment_score(&format!("{:?}", segment).to_lowercase(), score)?;
        match segment {
            ColonSegment::Right => self.right = score,
            ColonSegment::Transverse => self.transverse = score,
            ColonSegment::Left => self.left = score,
        }
        Ok(())
    }

    /// 总分
    pub fn total(&self) -> u8 {
        self.right + self.transverse + self.left
    }
}

impl Default for BowelPrepScale {
    fn default() -> Self {
        Self { right: 0, transverse: 0, left: 0 }
    }
}

fn check_segment_score(segment: &str, score: u8) -> Result<()> {
    if score > BOWEL_PREP_SEGMENT_MAX {
        return Err(EndoError::Validation(format!(
            "BBPS {} segment score {} is out of range 0..={}",
            segment, score, BOWEL_PREP_SEGMENT_MAX
        )));
    }
    Ok(())
}

/// AI 诊断请求进行中的持久化标记
pub const AI_PENDING_SENTINEL: &str = "loading";
/// AI 诊断请求失败的持久化标记
pub const AI_FAILED_SENTINEL: &str = "error";

/// 影像的 AI 诊断状态
///
/// 持久化时沿用字符串编码：`"loading"` 表示进行中，`"error"` 表示失败，其余为诊断结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AiDiagnosis {
    Pending,
    Failed,
    Resolved(String),
}

impl AiDiagnosis {
    pub fn is_pending(&self) -> bool {
        matches!(self, AiDiagnosis::Pending)
    }

    /// 已得出的诊断文本
    pub fn resolved_text(&self) -> Option<&str> {
        match self {
            AiDiagnosis::Resolved(text) => Some(text),
            _ => None,
        }
    }
}

impl From<String> for AiDiagnosis {
    fn from(value: String) -> Self {
        if value == AI_PENDING_SENTINEL {
            AiDiagnosis::Pending
        } else if value.eq_ignore_ascii_case(AI_FAILED_SENTINEL) {
            AiDiagnosis::Failed
        } else {
            AiDiagnosis::Resolved(value)
        }
    }
}

impl From<AiDiagnosis> for String {
    fn from(value: AiDiagnosis) -> Self {
        match value {
            AiDiagnosis::Pending => AI_PENDING_SENTINEL.to_string(),
            AiDiagnosis::Failed => AI_FAILED_SENTINEL.to_string(),
            AiDiagnosis::Resolved(text) => text,
        }
    }
}

/// 内镜影像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndoscopyImage {
    pub id: String,
    /// 所属部位键
    pub region: String,
    /// base64 data URL
    pub image_data_url: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_diagnosis: Option<AiDiagnosis>,
}

impl EndoscopyImage {
    /// data URL 中逗号之后的 base64 负载
    pub fn base64_payload(&self) -> Option<&str> {
        self.image_data_url.split_once(',').map(|(_, data)| data)
    }

    /// data URL 中声明的 MIME 类型，缺省为 `image/jpeg`
    pub fn mime_type(&self) -> &str {
        self.image_data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .filter(|mime| !mime.is_empty())
            .unwrap_or("image/jpeg")
    }
}

/// 检查报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub procedure_date: NaiveDate,
    pub procedure_type: ProcedureType,
    /// 结论
    #[serde(default)]
    pub diagnosis: String,
    /// 分部位所见
    #[serde(default)]
    pub findings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub images: Vec<EndoscopyImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endoscopist_id: Option<String>,
    #[serde(default)]
    pub assistant_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anesthetist_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anesthesia_type: Option<AnesthesiaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_status: Option<PatientStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boston_bowel_prep_scale: Option<BowelPrepScale>,
}

/// 新建报告的输入（不含ID）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub procedure_date: NaiveDate,
    pub procedure_type: ProcedureType,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub findings: BTreeMap<String, String>,
    #[serde(default)]
    pub consent: Option<String>,
    #[serde(default)]
    pub indication: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub images: Vec<EndoscopyImage>,
    #[serde(default)]
    pub endoscopist_id: Option<String>,
    #[serde(default)]
    pub assistant_ids: Vec<String>,
    #[serde(default)]
    pub anesthetist_name: Option<String>,
    #[serde(default)]
    pub anesthesia_type: Option<AnesthesiaType>,
    #[serde(default)]
    pub patient_status: Option<PatientStatus>,
    #[serde(default)]
    pub boston_bowel_prep_scale: Option<BowelPrepScale>,
}

impl NewReport {
    /// 只填写必填字段的空白报告
    pub fn blank(procedure_type: ProcedureType, procedure_date: NaiveDate) -> Self {
        Self {
            procedure_date,
            procedure_type,
            diagnosis: String::new(),
            findings: BTreeMap::new(),
            consent: None,
            indication: None,
            recommendation: None,
            images: Vec::new(),
            endoscopist_id: None,
            assistant_ids: Vec::new(),
            anesthetist_name: None,
            anesthesia_type: None,
            patient_status: None,
            boston_bowel_prep_scale: None,
        }
    }

    pub fn into_report(self, id: String) -> Report {
        Report {
            id,
            procedure_date: self.procedure_date,
            procedure_type: self.procedure_type,
            diagnosis: self.diagnosis,
            findings: self.findings,
            consent: self.consent,
            indication: self.indication,
            recommendation: self.recommendation,
            images: self.images,
            endoscopist_id: self.endoscopist_id,
            assistant_ids: self.assistant_ids,
            anesthetist_name: self.anesthetist_name,
            anesthesia_type: self.anesthesia_type,
            patient_status: self.patient_status,
            boston_bowel_prep_scale: self.boston_bowel_prep_scale,
        }
    }
}

impl From<Report> for NewReport {
    fn from(report: Report) -> Self {
        Self {
            procedure_date: report.procedure_date,
            procedure_type: report.procedure_type,
            diagnosis: report.diagnosis,
            findings: report.findings,
            consent: report.consent,
            indication: report.indication,
            recommendation: report.recommendation,
            images: report.images,
            endoscopist_id: report.endoscopist_id,
            assistant_ids: report.assistant_ids,
            anesthetist_name: report.anesthetist_name,
            anesthesia_type: report.anesthesia_type,
            patient_status: report.patient_status,
            boston_bowel_prep_scale: report.boston_bowel_prep_scale,
        }
    }
}

/// 报告的部分更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPatch {
    pub procedure_date: Option<NaiveDate>,
    pub procedure_type: Option<ProcedureType>,
    pub diagnosis: Option<String>,
    pub findings: Option<BTreeMap<String, String>>,
    pub consent: Option<String>,
    pub indication: Option<String>,
    pub recommendation: Option<String>,
    pub images: Option<Vec<EndoscopyImage>>,
    pub endoscopist_id: Option<String>,
    pub assistant_ids: Option<Vec<String>>,
    pub anesthetist_name: Option<String>,
    pub anesthesia_type: Option<AnesthesiaType>,
    pub patient_status: Option<PatientStatus>,
    pub boston_bowel_prep_scale: Option<BowelPrepScale>,
}

impl Report {
    /// 合并部分字段（不处理检查类型切换，切换逻辑由记录存储负责）
    pub fn merge(&mut self, patch: ReportPatch) {
        if let Some(v) = patch.procedure_date {
            self.procedure_date = v;
        }
        if let Some(v) = patch.procedure_type {
            self.procedure_type = v;
        }
        if let Some(v) = patch.diagnosis {
            self.diagnosis = v;
        }
        if let Some(v) = patch.findings {
            self.findings = v;
        }
        if let Some(v) = patch.consent {
            self.consent = Some(v);
        }
        if let Some(v) = patch.indication {
            self.indication = Some(v);
        }
        if let Some(v) = patch.recommendation {
            self.recommendation = Some(v);
        }
        if let Some(v) = patch.images {
            self.images = v;
        }
        if let Some(v) = patch.endoscopist_id {
            self.endoscopist_id = Some(v);
        }
        if let Some(v) = patch.assistant_ids {
            self.assistant_ids = v;
        }
        if let Some(v) = patch.anesthetist_name {
            self.anesthetist_name = Some(v);
        }
        if let Some(v) = patch.anesthesia_type {
            self.anesthesia_type = Some(v);
        }
        if let Some(v) = patch.patient_status {
            self.patient_status = Some(v);
        }
        if let Some(v) = patch.boston_bowel_prep_scale {
            self.boston_bowel_prep_scale = Some(v);
        }
    }

    /// 波士顿评分总分（仅结肠镜）
    pub fn bowel_prep_total(&self) -> Option<u8> {
        self.boston_bowel_prep_scale.as_ref().map(BowelPrepScale::total)
    }

    pub fn image(&self, image_id: &str) -> Option<&EndoscopyImage> {
        self.images.iter().find(|img| img.id == image_id)
    }

    pub fn image_mut(&mut self, image_id: &str) -> Option<&mut EndoscopyImage> {
        self.images.iter_mut().find(|img| img.id == image_id)
    }
}

/// 患者信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    /// 身份证号或院内唯一标识
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    #[serde(default)]
    pub reports: Vec<Report>,
}

impl Patient {
    pub fn report(&self, report_id: &str) -> Option<&Report> {
        self.reports.iter().find(|r| r.id == report_id)
    }

    pub fn report_mut(&mut self, report_id: &str) -> Option<&mut Report> {
        self.reports.iter_mut().find(|r| r.id == report_id)
    }
}

/// 患者登记输入（不含报告）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    /// 为空时由存储生成
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
}

impl NewPatient {
    pub fn new(id: impl Into<String>, name: impl Into<String>, age: u32, gender: Gender) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            age,
            gender,
        }
    }

    /// 去除空白后的非空ID
    pub fn supplied_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

/// 患者的部分更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPatch {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
}

impl Patient {
    pub fn merge(&mut self, patch: PatientPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(age) = patch.age {
            self.age = age;
        }
        if let Some(gender) = patch.gender {
            self.gender = gender;
        }
    }
}

/// 内镜医生
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
}

/// 内镜助手
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
}

/// 界面主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl FromStr for Theme {
    type Err = EndoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(EndoError::Validation(format!("Unknown theme: {}", other))),
        }
    }
}

/// 应用设置（进程级单例）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub theme: Theme,
    pub notifications_enabled: bool,
    pub ai_enabled: bool,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            notifications_enabled: true,
            ai_enabled: true,
            last_synced: None,
        }
    }
}

/// 设置的部分更新
///
/// `last_synced` 区分“未提供”与“显式置空”。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub ai_enabled: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub last_synced: Option<Option<DateTime<Utc>>>,
}

fn deserialize_present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl AppSettings {
    /// 浅合并
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(enabled) = patch.notifications_enabled {
            self.notifications_enabled = enabled;
        }
        if let Some(enabled) = patch.ai_enabled {
            self.ai_enabled = enabled;
        }
        if let Some(last_synced) = patch.last_synced {
            self.last_synced = last_synced;
        }
    }
}

/// 内置默认医生名单
pub fn default_doctors() -> Vec<Doctor> {
    [
        "Dr. KY Vutha",
        "Dr. MAK Sopheak",
        "Dr. SANN Channa",
        "Dr. VONG Chanlina",
        "Dr. CHHEANG Sidet",
        "Dr. HAK Chanpheakdey",
        "Dr. LY Kimchhun",
        "Dr. RO Kimchhay",
        "Dr. OUNG Borathchakra",
        "Dr. LONG Chansomphy",
        "Dr. SENG Rithraingsey",
        "Dr. VANNA Chetra",
        "Dr. KHY Makara",
        "Dr. KIM Kolveasna",
        "Dr. OENG Leangseng",
        "Dr. ENG Tharo",
        "Dr. OUCH Punleu",
    ]
    .iter()
    .enumerate()
    .map(|(i, name)| Doctor {
        id: format!("doc-{}", i + 1),
        name: name.to_string(),
    })
    .collect()
}

/// 内置默认助手名单
pub fn default_assistants() -> Vec<Assistant> {
    vec![Assistant {
        id: "asst-1".to_string(),
        name: "DES. THY Seyha".to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bowel_prep_total_is_sum() {
        for right in 0..=3 {
            for transverse in 0..=3 {
                for left in 0..=3 {
                    let bbps = BowelPrepScale::new(right, transverse, left).unwrap();
                    assert_eq!(bbps.total(), right + transverse + left);
                }
            }
        }
    }

    #[test]
    fn test_bowel_prep_rejects_out_of_range() {
        assert!(BowelPrepScale::new(4, 0, 0).is_err());

        let mut bbps = BowelPrepScale::excellent();
        assert!(bbps.set_segment(ColonSegment::Left, 5).is_err());
        assert_eq!(bbps.left(), 3);

        bbps.set_segment(ColonSegment::Transverse, 1).unwrap();
        assert_eq!(bbps.total(), 7);

        let parsed: std::result::Result<BowelPrepScale, _> =
            serde_json::from_value(json!({"right": 3, "transverse": 9, "left": 3}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ai_diagnosis_sentinels() {
        assert_eq!(AiDiagnosis::from("loading".to_string()), AiDiagnosis::Pending);
        assert_eq!(AiDiagnosis::from("Error".to_string()), AiDiagnosis::Failed);
        assert_eq!(
            AiDiagnosis::from("Gastric ulcer".to_string()),
            AiDiagnosis::Resolved("Gastric ulcer".to_string())
        );
        assert_eq!(serde_json::to_value(AiDiagnosis::Pending).unwrap(), json!("loading"));
    }

    #[test]
    fn test_report_wire_format() {
        let value = json!({
            "id": "REP-1",
            "procedureDate": "2024-01-01",
            "procedureType": "Colonoscopy",
            "diagnosis": "Normal",
            "anesthesiaType": "Monitored Anesthesia Care (MAC)",
            "bostonBowelPrepScale": {"right": 3, "transverse": 2, "left": 3}
        });
        let report: Report = serde_json::from_value(value).unwrap();
        assert_eq!(report.procedure_type, ProcedureType::Colonoscopy);
        assert_eq!(report.anesthesia_type, Some(AnesthesiaType::Mac));
        assert_eq!(report.bowel_prep_total(), Some(8));
        assert!(report.assistant_ids.is_empty());

        let back = serde_json::to_value(&report).unwrap();
        assert_eq!(back["procedureType"], "Colonoscopy");
        assert!(back.get("endoscopistId").is_none());
    }

    #[test]
    fn test_image_payload() {
        let image = EndoscopyImage {
            id: "IMG-1".to_string(),
            region: "esophagus".to_string(),
            image_data_url: "data:image/png;base64,aGVsbG8=".to_string(),
            label: String::new(),
            ai_diagnosis: None,
        };
        assert_eq!(image.base64_payload(), Some("aGVsbG8="));
        assert_eq!(image.mime_type(), "image/png");
    }

    #[test]
    fn test_settings_patch_merge() {
        let mut settings = AppSettings::default();
        settings.last_synced = Some(Utc::now());

        let patch: SettingsPatch =
            serde_json::from_value(json!({"theme": "dark", "lastSynced": null})).unwrap();
        settings.merge(patch);
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(settings.last_synced, None);
        assert!(settings.ai_enabled);

        let untouched: SettingsPatch = serde_json::from_value(json!({"aiEnabled": false})).unwrap();
        assert_eq!(untouched.last_synced, None);
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!("female".parse::<Gender>().unwrap(), Gender::Female);
        assert!("x".parse::<Gender>().is_err());
    }

    #[test]
    fn test_default_staff() {
        let doctors = default_doctors();
        assert_eq!(doctors.len(), 17);
        assert_eq!(doctors[0].id, "doc-1");
        assert_eq!(doctors[16].name, "Dr. OUCH Punleu");
        assert_eq!(default_assistants()[0].id, "asst-1");
    }
}
