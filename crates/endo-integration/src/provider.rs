//! AI诊断提供方
//!
//! 模型接入只通过 [`DiagnosisProvider`]，返回模型原始文本；文本必须是带字符串 `diagnosis`
//! 字段的 JSON 对象，其他任何形式都视为失败，不做部分采纳。

use anyhow::Result;
use async_trait::async_trait;
use endo_core::{EndoError, EndoscopyImage, AI_FAILED_SENTINEL, AI_PENDING_SENTINEL};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 诊断请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRequest {
    pub prompt: String,
    /// 去掉 data URL 前缀后的 base64 数据
    pub image_base64: Option<String>,
    pub mime_type: String,
}

impl DiagnosisRequest {
    /// 由影像构造请求
    pub fn for_image(image: &EndoscopyImage) -> Self {
        Self {
            prompt: build_diagnosis_prompt(&image.region, &image.label),
            image_base64: image.base64_payload().map(str::to_string),
            mime_type: image.mime_type().to_string(),
        }
    }
}

/// 诊断提供方接口
#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    /// 提供方名称，用于日志
    fn name(&self) -> &str;

    /// 发送请求，返回模型原始文本
    async fn diagnose(&self, request: DiagnosisRequest) -> Result<String>;
}

/// 构造诊断提示词
pub fn build_diagnosis_prompt(region: &str, label: &str) -> String {
    let region_name = region.replace('_', " ");
    let mut prompt = format!("Analyze this endoscopy image of the {}.", region_name);
    let label = label.trim();
    if !label.is_empty() {
        prompt.push_str(&format!(" The endoscopist labeled it as '{}'.", label));
    }
    prompt.push_str(
        " Identify the most likely finding and answer with a short, concise medical term. \
         Respond with a JSON object with a single string field \"diagnosis\".",
    );
    prompt
}

/// 校验模型响应并取出诊断文本
pub fn parse_diagnosis_response(raw: &str) -> endo_core::Result<String> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| EndoError::AiResponse(format!("Response is not valid JSON: {}", e)))?;

    match value.get("diagnosis") {
        Some(Value::String(diagnosis)) => {
            let diagnosis = diagnosis.trim();
            if diagnosis.is_empty() {
                Err(EndoError::AiResponse("Diagnosis is empty".to_string()))
            } else if [AI_PENDING_SENTINEL, AI_FAILED_SENTINEL]
                .iter()
                .any(|sentinel| diagnosis.eq_ignore_ascii_case(sentinel))
            {
                // 与持久化的状态标记冲突，重新加载后会被误读
                Err(EndoError::AiResponse(format!(
                    "Diagnosis '{}' collides with a reserved status marker",
                    diagnosis
                )))
            } else {
                Ok(diagnosis.to_string())
            }
        }
        Some(other) => Err(EndoError::AiResponse(format!(
            "Field 'diagnosis' must be a string, got {}",
            other
        ))),
        None => Err(EndoError::AiResponse(
            "AI response is not in the expected format".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_response() {
        assert_eq!(
            parse_diagnosis_response("  {\"diagnosis\": \"Gastric ulcer\"}\n").unwrap(),
            "Gastric ulcer"
        );
    }

    #[test]
    fn test_parse_rejects_malformed_response() {
        for raw in [
            "Gastric ulcer",
            "[\"diagnosis\"]",
            "{\"diagnosis\": 42}",
            "{\"summary\": \"x\"}",
            "{\"diagnosis\": \"  \"}",
            "{\"diagnosis\": \"loading\"}",
            "{\"diagnosis\": \"Loading\"}",
            "{\"diagnosis\": \" ERROR \"}",
        ] {
            assert!(
                matches!(parse_diagnosis_response(raw), Err(EndoError::AiResponse(_))),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_prompt_mentions_region_and_label() {
        let prompt = build_diagnosis_prompt("stomach_antrum", "Erosion");
        assert!(prompt.contains("stomach antrum"));
        assert!(prompt.contains("'Erosion'"));
        assert!(prompt.contains("\"diagnosis\""));

        assert!(!build_diagnosis_prompt("rectum", " ").contains("labeled"));
    }

    #[test]
    fn test_request_for_image() {
        let image = EndoscopyImage {
            id: "IMG-1".to_string(),
            region: "rectum".to_string(),
            image_data_url: "data:image/png;base64,aGVsbG8=".to_string(),
            label: String::new(),
            ai_diagnosis: None,
        };
        let request = DiagnosisRequest::for_image(&image);
        assert_eq!(request.image_base64.as_deref(), Some("aGVsbG8="));
        assert_eq!(request.mime_type, "image/png");
    }
}
