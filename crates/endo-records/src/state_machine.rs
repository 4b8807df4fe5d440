//! AI诊断状态机
//!
//! 影像AI诊断字段的生命周期：`无 → 进行中 → {已得出 | 失败}`。
//! 任意状态都可以重新提交回到进行中，完成事件只在进行中状态下有效。

use std::collections::HashMap;

use endo_core::{AiDiagnosis, EndoError, Result};
use serde::{Deserialize, Serialize};

/// 诊断阶段（不含诊断文本）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiagnosisPhase {
    Absent,
    Pending,
    Resolved,
    Failed,
}

impl DiagnosisPhase {
    pub fn of(diagnosis: Option<&AiDiagnosis>) -> Self {
        match diagnosis {
            None => DiagnosisPhase::Absent,
            Some(AiDiagnosis::Pending) => DiagnosisPhase::Pending,
            Some(AiDiagnosis::Resolved(_)) => DiagnosisPhase::Resolved,
            Some(AiDiagnosis::Failed) => DiagnosisPhase::Failed,
        }
    }
}

/// 诊断状态转换事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisEvent {
    /// 请求已提交
    Submitted,
    /// 请求成功，携带诊断文本
    Succeeded(String),
    /// 请求失败或超时
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventKind {
    Submitted,
    Succeeded,
    Failed,
}

impl DiagnosisEvent {
    fn kind(&self) -> EventKind {
        match self {
            DiagnosisEvent::Submitted => EventKind::Submitted,
            DiagnosisEvent::Succeeded(_) => EventKind::Succeeded,
            DiagnosisEvent::Failed => EventKind::Failed,
        }
    }
}

/// AI诊断状态机
#[derive(Debug)]
pub struct DiagnosisStateMachine {
    transitions: HashMap<(DiagnosisPhase, EventKind), DiagnosisPhase>,
}

impl DiagnosisStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        for phase in [
            DiagnosisPhase::Absent,
            DiagnosisPhase::Pending,
            DiagnosisPhase::Resolved,
            DiagnosisPhase::Failed,
        ] {
            transitions.insert((phase, EventKind::Submitted), DiagnosisPhase::Pending);
        }
        transitions.insert((DiagnosisPhase::Pending, EventKind::Succeeded), DiagnosisPhase::Resolved);
        transitions.insert((DiagnosisPhase::Pending, EventKind::Failed), DiagnosisPhase::Failed);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: Option<&AiDiagnosis>, event: &DiagnosisEvent) -> bool {
        self.transitions
            .contains_key(&(DiagnosisPhase::of(from), event.kind()))
    }

    /// 执行状态转换
    pub fn transition(&self, from: Option<&AiDiagnosis>, event: DiagnosisEvent) -> Result<AiDiagnosis> {
        let phase = DiagnosisPhase::of(from);
        match self.transitions.get(&(phase, event.kind())) {
            Some(_) => Ok(match event {
                DiagnosisEvent::Submitted => AiDiagnosis::Pending,
                DiagnosisEvent::Succeeded(text) => AiDiagnosis::Resolved(text),
                DiagnosisEvent::Failed => AiDiagnosis::Failed,
            }),
            None => Err(EndoError::InvalidStateTransition {
                from: format!("{:?}", phase),
                event: format!("{:?}", event.kind()),
            }),
        }
    }
}

impl Default for DiagnosisStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = DiagnosisStateMachine::new();

        assert!(sm.can_transition(None, &DiagnosisEvent::Submitted));
        assert!(sm.can_transition(Some(&AiDiagnosis::Pending), &DiagnosisEvent::Failed));
        assert!(sm.can_transition(
            Some(&AiDiagnosis::Pending),
            &DiagnosisEvent::Succeeded("Polyp".to_string())
        ));
        // 重新提交不被阻止
        assert!(sm.can_transition(Some(&AiDiagnosis::Pending), &DiagnosisEvent::Submitted));
        assert!(sm.can_transition(Some(&AiDiagnosis::Failed), &DiagnosisEvent::Submitted));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = DiagnosisStateMachine::new();

        assert!(!sm.can_transition(None, &DiagnosisEvent::Failed));
        assert!(!sm.can_transition(
            Some(&AiDiagnosis::Resolved("Ulcer".to_string())),
            &DiagnosisEvent::Succeeded("Polyp".to_string())
        ));
    }

    #[test]
    fn test_state_execution() {
        let sm = DiagnosisStateMachine::new();

        let pending = sm.transition(None, DiagnosisEvent::Submitted).unwrap();
        assert_eq!(pending, AiDiagnosis::Pending);

        let resolved = sm
            .transition(Some(&pending), DiagnosisEvent::Succeeded("Gastritis".to_string()))
            .unwrap();
        assert_eq!(resolved.resolved_text(), Some("Gastritis"));

        let result = sm.transition(Some(&resolved), DiagnosisEvent::Failed);
        assert!(matches!(result, Err(EndoError::InvalidStateTransition { .. })));
    }
}
