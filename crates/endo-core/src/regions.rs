//! 检查部位表与报告模板
//!
//! 每种检查类型对应一组固定的部位键，报告的分部位所见只能使用所属检查类型的部位键。

use std::collections::BTreeMap;

use crate::error::{EndoError, Result};
use crate::models::{AnesthesiaType, BowelPrepScale, PatientStatus, ProcedureType};

const GASTROSCOPY_REGIONS: &[&str] = &[
    "esophagus",
    "gej",
    "stomach_content",
    "stomach_fundus",
    "stomach_body",
    "stomach_antrum",
    "stomach_pylorus",
    "duodenum_bulb",
    "duodenum_second_part",
];

const COLONOSCOPY_REGIONS: &[&str] = &[
    "rectum",
    "sigmoid_colon",
    "descending_colon",
    "transverse_colon",
    "ascending_colon",
    "cecum",
    "terminal_ileum",
];

const ERCP_REGIONS: &[&str] = &["papilla_of_vater", "common_bile_duct", "pancreatic_duct"];

const EUS_REGIONS: &[&str] = &[
    "eus_esophagus",
    "eus_stomach",
    "eus_duodenum",
    "eus_pancreas",
    "eus_bile_duct",
    "eus_liver",
    "eus_mediastinum",
];

const CHOLANGIOSCOPY_REGIONS: &[&str] = &["bile_duct_lumen", "bile_duct_wall", "intrahepatic_ducts"];

const ENTEROSCOPY_REGIONS: &[&str] = &["enteroscopy_duodenum", "jejunum", "ileum"];

/// 模板中“未见异常”的所见文本
pub const NORMAL_FINDING: &str = "Normal";

const TEMPLATE_CONSENT: &str =
    "The procedure, its benefits, risks and alternatives were explained and informed consent was obtained.";
const TEMPLATE_RECOMMENDATION: &str = "Follow up in the outpatient clinic with pathology results.";

impl ProcedureType {
    /// 该检查类型的部位键列表
    pub fn regions(&self) -> &'static [&'static str] {
        match self {
            ProcedureType::Gastroscopy => GASTROSCOPY_REGIONS,
            ProcedureType::Colonoscopy => COLONOSCOPY_REGIONS,
            ProcedureType::Ercp => ERCP_REGIONS,
            ProcedureType::Eus => EUS_REGIONS,
            ProcedureType::Cholangioscopy => CHOLANGIOSCOPY_REGIONS,
            ProcedureType::Enteroscopy => ENTEROSCOPY_REGIONS,
        }
    }

    pub fn has_region(&self, region: &str) -> bool {
        self.regions().contains(&region)
    }
}

/// 校验分部位所见的键全部属于该检查类型
pub fn validate_findings(procedure_type: ProcedureType, findings: &BTreeMap<String, String>) -> Result<()> {
    match findings.keys().find(|key| !procedure_type.has_region(key)) {
        Some(key) => Err(EndoError::Validation(format!(
            "Region '{}' is not defined for {}",
            key, procedure_type
        ))),
        None => Ok(()),
    }
}

/// 按检查类型生成的报告默认字段
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTemplate {
    pub diagnosis: String,
    pub consent: String,
    pub indication: String,
    pub recommendation: String,
    pub anesthesia_type: AnesthesiaType,
    pub patient_status: PatientStatus,
    /// 仅胃镜和结肠镜预填“Normal”
    pub findings: BTreeMap<String, String>,
    pub boston_bowel_prep_scale: Option<BowelPrepScale>,
}

/// 获取检查类型对应的报告模板
pub fn report_template(procedure_type: ProcedureType) -> ReportTemplate {
    let (diagnosis, indication, anesthesia_type, patient_status) = match procedure_type {
        ProcedureType::Gastroscopy => (
            "Normal upper GI endoscopy.",
            "Dyspepsia / epigastric pain.",
            AnesthesiaType::Mac,
            PatientStatus::Outpatient,
        ),
        ProcedureType::Colonoscopy => (
            "Normal colonoscopy to the terminal ileum.",
            "Change in bowel habit / screening.",
            AnesthesiaType::Mac,
            PatientStatus::Outpatient,
        ),
        ProcedureType::Ercp => (
            "Successful biliary cannulation and drainage.",
            "Obstructive jaundice / choledocholithiasis.",
            AnesthesiaType::General,
            PatientStatus::Inpatient,
        ),
        ProcedureType::Eus => (
            "No significant abnormality on endoscopic ultrasound.",
            "Evaluation of pancreaticobiliary pathology.",
            AnesthesiaType::Mac,
            PatientStatus::Outpatient,
        ),
        ProcedureType::Cholangioscopy => (
            "Cholangioscopy performed; see findings.",
            "Indeterminate biliary stricture.",
            AnesthesiaType::General,
            PatientStatus::Inpatient,
        ),
        ProcedureType::Enteroscopy => (
            "Normal small bowel enteroscopy.",
            "Obscure gastrointestinal bleeding.",
            AnesthesiaType::General,
            PatientStatus::Inpatient,
        ),
    };

    let findings = match procedure_type {
        ProcedureType::Gastroscopy | ProcedureType::Colonoscopy => procedure_type
            .regions()
            .iter()
            .map(|region| (region.to_string(), NORMAL_FINDING.to_string()))
            .collect(),
        _ => BTreeMap::new(),
    };

    ReportTemplate {
        diagnosis: diagnosis.to_string(),
        consent: TEMPLATE_CONSENT.to_string(),
        indication: indication.to_string(),
        recommendation: TEMPLATE_RECOMMENDATION.to_string(),
        anesthesia_type,
        patient_status,
        findings,
        boston_bowel_prep_scale: procedure_type
            .supports_bowel_prep()
            .then(BowelPrepScale::excellent),
    }
}
