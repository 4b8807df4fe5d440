//! 报告草稿
//!
//! 保存前在内存中编辑的报告。新建时按检查类型套用模板，切换检查类型时重新套用模板并清空
//! 分部位所见和麻醉医生姓名。

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::NaiveDate;
use endo_core::regions::validate_findings;
use endo_core::utils::{generate_id, IMAGE_ID_PREFIX};
use endo_core::{
    report_template, BowelPrepScale, ColonSegment, Doctor, EndoError, EndoscopyImage, NewReport,
    ProcedureType, Report, Result,
};

use crate::state_machine::{DiagnosisEvent, DiagnosisStateMachine};

/// 报告草稿
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDraft {
    report: NewReport,
}

impl ReportDraft {
    /// 新建草稿：套用模板，默认内镜医生为名单第一位
    pub fn new(procedure_type: ProcedureType, procedure_date: NaiveDate, doctors: &[Doctor]) -> Self {
        let mut report = NewReport::blank(procedure_type, procedure_date);
        report.endoscopist_id = doctors.first().map(|d| d.id.clone());
        report.anesthetist_name = Some(String::new());
        apply_template(&mut report, procedure_type);
        Self { report }
    }

    /// 从已保存的报告开始编辑
    pub fn from_report(report: &Report) -> Self {
        Self {
            report: NewReport::from(report.clone()),
        }
    }

    pub fn report(&self) -> &NewReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut NewReport {
        &mut self.report
    }

    /// 不做校验直接取出
    pub fn into_inner(self) -> NewReport {
        self.report
    }

    pub fn procedure_type(&self) -> ProcedureType {
        self.report.procedure_type
    }

    /// 切换检查类型
    pub fn set_procedure_type(&mut self, procedure_type: ProcedureType) {
        apply_template(&mut self.report, procedure_type);
        self.report.findings.clear();
        self.report.anesthetist_name = Some(String::new());
    }

    /// 填写单个部位的所见
    pub fn set_finding(&mut self, region: &str, text: impl Into<String>) -> Result<()> {
        ensure_region(self.report.procedure_type, region)?;
        self.report.findings.insert(region.to_string(), text.into());
        Ok(())
    }

    /// 勾选或取消助手（集合语义，不重复）
    pub fn toggle_assistant(&mut self, assistant_id: &str, checked: bool) {
        let ids = &mut self.report.assistant_ids;
        if checked {
            if !ids.iter().any(|id| id == assistant_id) {
                ids.push(assistant_id.to_string());
            }
        } else {
            ids.retain(|id| id != assistant_id);
        }
    }

    /// 修改波士顿评分单段分值，仅结肠镜可用
    pub fn set_bowel_prep_segment(&mut self, segment: ColonSegment, score: u8) -> Result<()> {
        if !self.report.procedure_type.supports_bowel_prep() {
            return Err(EndoError::Validation(format!(
                "BBPS is not applicable to {}",
                self.report.procedure_type
            )));
        }
        self.report
            .boston_bowel_prep_scale
            .get_or_insert_with(BowelPrepScale::default)
            .set_segment(segment, score)
    }

    /// 上传影像
    pub fn add_image(&mut self, region: &str, image_data_url: impl Into<String>) -> Result<&EndoscopyImage> {
        let image = new_image(self.report.procedure_type, region, image_data_url.into(), String::new())?;
        self.report.images.push(image);
        Ok(&self.report.images[self.report.images.len() - 1])
    }

    pub fn update_image_label(&mut self, image_id: &str, label: impl Into<String>) {
        if let Some(image) = self.report.images.iter_mut().find(|img| img.id == image_id) {
            image.label = label.into();
        }
    }

    pub fn remove_image(&mut self, image_id: &str) {
        self.report.images.retain(|img| img.id != image_id);
    }

    /// 推进影像的AI诊断状态
    pub fn set_image_diagnosis(&mut self, image_id: &str, event: DiagnosisEvent) -> Result<()> {
        let Some(image) = self.report.images.iter_mut().find(|img| img.id == image_id) else {
            return Ok(());
        };
        let next = DiagnosisStateMachine::new().transition(image.ai_diagnosis.as_ref(), event)?;
        image.ai_diagnosis = Some(next);
        Ok(())
    }

    /// 把影像的AI诊断追加到对应部位的所见，未得出诊断时返回 false
    pub fn apply_ai_suggestion(&mut self, image_id: &str) -> bool {
        let Some(image) = self.report.images.iter().find(|img| img.id == image_id) else {
            return false;
        };
        let Some(text) = image.ai_diagnosis.as_ref().and_then(|dx| dx.resolved_text()) else {
            return false;
        };
        if !self.report.procedure_type.has_region(&image.region) {
            return false;
        }
        let region = image.region.clone();
        let text = text.to_string();
        append_suggestion(&mut self.report.findings, &region, &text);
        true
    }

    /// 校验后输出新建报告
    pub fn into_new_report(self) -> Result<NewReport> {
        validate_report_fields(
            self.report.procedure_type,
            &self.report.findings,
            self.report.boston_bowel_prep_scale.as_ref(),
        )?;
        Ok(self.report)
    }
}

/// 套用检查类型模板
fn apply_template(report: &mut NewReport, procedure_type: ProcedureType) {
    let template = report_template(procedure_type);
    report.procedure_type = procedure_type;
    report.diagnosis = template.diagnosis;
    report.consent = Some(template.consent);
    report.indication = Some(template.indication);
    report.recommendation = Some(template.recommendation);
    report.anesthesia_type = Some(template.anesthesia_type);
    report.patient_status = Some(template.patient_status);
    report.findings = template.findings;
    report.boston_bowel_prep_scale = template.boston_bowel_prep_scale;
}

/// 追加AI建议：已有内容时以 `\n- ` 分隔
pub(crate) fn append_suggestion(findings: &mut BTreeMap<String, String>, region: &str, diagnosis: &str) {
    let entry = findings.entry(region.to_string()).or_default();
    if entry.is_empty() {
        entry.push_str(diagnosis);
    } else {
        entry.push_str("\n- ");
        entry.push_str(diagnosis);
    }
}

fn ensure_region(procedure_type: ProcedureType, region: &str) -> Result<()> {
    if procedure_type.has_region(region) {
        Ok(())
    } else {
        Err(EndoError::Validation(format!(
            "Region '{}' is not defined for {}",
            region, procedure_type
        )))
    }
}

/// 构造新影像，校验部位和 base64 data URL
pub(crate) fn new_image(
    procedure_type: ProcedureType,
    region: &str,
    image_data_url: String,
    label: String,
) -> Result<EndoscopyImage> {
    ensure_region(procedure_type, region)?;
    let payload = image_data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, data)| data)
        .ok_or_else(|| EndoError::Validation("Image must be a base64 data URL".to_string()))?;
    STANDARD
        .decode(payload)
        .map_err(|e| EndoError::Validation(format!("Invalid image payload: {}", e)))?;

    Ok(EndoscopyImage {
        id: generate_id(IMAGE_ID_PREFIX),
        region: region.to_string(),
        image_data_url,
        label,
        ai_diagnosis: None,
    })
}

/// 报告字段不变式：所见键属于检查类型的部位表，BBPS仅用于结肠镜
pub(crate) fn validate_report_fields(
    procedure_type: ProcedureType,
    findings: &BTreeMap<String, String>,
    bowel_prep: Option<&BowelPrepScale>,
) -> Result<()> {
    validate_findings(procedure_type, findings)?;
    if bowel_prep.is_some() && !procedure_type.supports_bowel_prep() {
        return Err(EndoError::Validation(format!(
            "BBPS is not applicable to {}",
            procedure_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use endo_core::{default_doctors, AiDiagnosis, AnesthesiaType};

    const PIXEL: &str = "data:image/jpeg;base64,aGVsbG8=";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_new_draft_applies_template() {
        let draft = ReportDraft::new(ProcedureType::Gastroscopy, date(), &default_doctors());
        let report = draft.report();
        assert_eq!(report.endoscopist_id.as_deref(), Some("doc-1"));
        assert_eq!(report.findings.len(), 9);
        assert_eq!(report.anesthesia_type, Some(AnesthesiaType::Mac));
        assert!(report.boston_bowel_prep_scale.is_none());

        let empty = ReportDraft::new(ProcedureType::Ercp, date(), &[]);
        assert!(empty.report().endoscopist_id.is_none());
    }

    #[test]
    fn test_procedure_type_change_clears_findings_and_anesthetist() {
        let mut draft = ReportDraft::new(ProcedureType::Gastroscopy, date(), &[]);
        draft.set_finding("esophagus", "Barrett's mucosa").unwrap();
        draft.report_mut().anesthetist_name = Some("Dr. Sedation".to_string());

        draft.set_procedure_type(ProcedureType::Colonoscopy);
        let report = draft.report();
        assert!(report.findings.is_empty());
        assert_eq!(report.anesthetist_name.as_deref(), Some(""));
        assert_eq!(report.boston_bowel_prep_scale, Some(BowelPrepScale::excellent()));

        draft.set_procedure_type(ProcedureType::Ercp);
        assert!(draft.report().boston_bowel_prep_scale.is_none());
        assert_eq!(draft.report().anesthesia_type, Some(AnesthesiaType::General));
    }

    #[test]
    fn test_set_finding_rejects_foreign_region() {
        let mut draft = ReportDraft::new(ProcedureType::Colonoscopy, date(), &[]);
        assert!(draft.set_finding("esophagus", "x").is_err());
        assert!(draft.set_finding("cecum", "Normal appendiceal orifice").is_ok());
    }

    #[test]
    fn test_toggle_assistant_is_set_like() {
        let mut draft = ReportDraft::new(ProcedureType::Gastroscopy, date(), &[]);
        draft.toggle_assistant("asst-1", true);
        draft.toggle_assistant("asst-1", true);
        draft.toggle_assistant("asst-2", true);
        assert_eq!(draft.report().assistant_ids, vec!["asst-1", "asst-2"]);

        draft.toggle_assistant("asst-1", false);
        assert_eq!(draft.report().assistant_ids, vec!["asst-2"]);
    }

    #[test]
    fn test_bowel_prep_only_for_colonoscopy() {
        let mut draft = ReportDraft::new(ProcedureType::Gastroscopy, date(), &[]);
        assert!(draft.set_bowel_prep_segment(ColonSegment::Left, 2).is_err());

        let mut draft = ReportDraft::new(ProcedureType::Colonoscopy, date(), &[]);
        draft.set_bowel_prep_segment(ColonSegment::Transverse, 2).unwrap();
        assert_eq!(draft.report().boston_bowel_prep_scale.map(|b| b.total()), Some(8));
        assert!(draft.set_bowel_prep_segment(ColonSegment::Right, 4).is_err());
    }

    #[test]
    fn test_ai_suggestion_appends_to_region_finding() {
        let mut draft = ReportDraft::new(ProcedureType::Gastroscopy, date(), &[]);
        let image_id = draft.add_image("stomach_antrum", PIXEL).unwrap().id.clone();

        // 未得出诊断时不应用
        assert!(!draft.apply_ai_suggestion(&image_id));

        draft.set_image_diagnosis(&image_id, DiagnosisEvent::Submitted).unwrap();
        assert!(!draft.apply_ai_suggestion(&image_id));
        draft
            .set_image_diagnosis(&image_id, DiagnosisEvent::Succeeded("Antral erosions".to_string()))
            .unwrap();

        assert!(draft.apply_ai_suggestion(&image_id));
        assert_eq!(draft.report().findings["stomach_antrum"], "Normal\n- Antral erosions");

        draft.report_mut().findings.remove("stomach_antrum");
        assert!(draft.apply_ai_suggestion(&image_id));
        assert_eq!(draft.report().findings["stomach_antrum"], "Antral erosions");
    }

    #[test]
    fn test_image_lifecycle() {
        let mut draft = ReportDraft::new(ProcedureType::Colonoscopy, date(), &[]);
        assert!(draft.add_image("esophagus", PIXEL).is_err());
        assert!(draft.add_image("rectum", "not-a-data-url").is_err());
        assert!(draft.add_image("rectum", "data:image/png;base64,@@@").is_err());

        let image_id = draft.add_image("rectum", PIXEL).unwrap().id.clone();
        draft.update_image_label(&image_id, "Sessile polyp");
        draft.set_image_diagnosis(&image_id, DiagnosisEvent::Submitted).unwrap();
        draft.set_image_diagnosis(&image_id, DiagnosisEvent::Failed).unwrap();
        assert_eq!(draft.report().images[0].label, "Sessile polyp");
        assert_eq!(draft.report().images[0].ai_diagnosis, Some(AiDiagnosis::Failed));

        draft.remove_image(&image_id);
        assert!(draft.report().images.is_empty());
    }

    #[test]
    fn test_into_new_report_validates() {
        let mut draft = ReportDraft::new(ProcedureType::Eus, date(), &[]);
        draft.report_mut().findings.insert("rectum".to_string(), "x".to_string());
        assert!(draft.into_new_report().is_err());

        let draft = ReportDraft::new(ProcedureType::Eus, date(), &[]);
        assert!(draft.into_new_report().is_ok());
    }
}
