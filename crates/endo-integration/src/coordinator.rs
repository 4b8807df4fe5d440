//! AI诊断请求协调器
//!
//! 每张影像最多一个在途请求。再次提交同一影像时取消先前的请求，只有最新一次提交的结果会写回；
//! 超过请求超时的请求按失败处理。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use endo_core::{AiDiagnosis, EndoError, Result};
use endo_records::{DiagnosisEvent, RecordStore};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::provider::{parse_diagnosis_response, DiagnosisProvider, DiagnosisRequest};

/// 默认请求超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// (患者ID, 报告ID, 影像ID)
type ImageKey = (String, String, String);

struct InFlight {
    ticket: u64,
    handle: Option<JoinHandle<()>>,
}

type InFlightMap = Arc<Mutex<HashMap<ImageKey, InFlight>>>;

/// AI诊断协调器
pub struct DiagnosisCoordinator {
    store: Arc<RwLock<RecordStore>>,
    provider: Arc<dyn DiagnosisProvider>,
    request_timeout: Duration,
    in_flight: InFlightMap,
    next_ticket: AtomicU64,
}

impl DiagnosisCoordinator {
    pub fn new(store: Arc<RwLock<RecordStore>>, provider: Arc<dyn DiagnosisProvider>) -> Self {
        Self {
            store,
            provider,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn store(&self) -> &Arc<RwLock<RecordStore>> {
        &self.store
    }

    /// 提交影像诊断请求
    ///
    /// 影像标记为进行中后立即返回，结果由后台任务写回。AI功能关闭时拒绝。
    pub async fn submit(&self, patient_id: &str, report_id: &str, image_id: &str) -> Result<()> {
        let request = {
            let store = self.store.read().await;
            if !store.settings().ai_enabled {
                return Err(EndoError::AiDisabled);
            }
            let image = store
                .find_image(patient_id, report_id, image_id)
                .ok_or_else(|| EndoError::NotFound(format!("Image {}", image_id)))?;
            DiagnosisRequest::for_image(image)
        };

        let key: ImageKey = (patient_id.to_string(), report_id.to_string(), image_id.to_string());
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let mut in_flight = self.in_flight.lock().await;
        if let Some(previous) = in_flight.remove(&key) {
            if let Some(handle) = previous.handle {
                handle.abort();
            }
            info!("Replacing in-flight diagnosis request for image {}", image_id);
        }

        self.store
            .write()
            .await
            .set_image_diagnosis(patient_id, report_id, image_id, DiagnosisEvent::Submitted)
            .await?;

        let handle = tokio::spawn(run_request(
            self.store.clone(),
            self.provider.clone(),
            self.in_flight.clone(),
            self.request_timeout,
            key.clone(),
            ticket,
            request,
        ));
        in_flight.insert(
            key,
            InFlight {
                ticket,
                handle: Some(handle),
            },
        );

        debug!("Submitted diagnosis request {} for image {}", ticket, image_id);
        Ok(())
    }

    /// 等待影像当前的请求结束，返回最终状态
    pub async fn wait(&self, patient_id: &str, report_id: &str, image_id: &str) -> Option<AiDiagnosis> {
        let key: ImageKey = (patient_id.to_string(), report_id.to_string(), image_id.to_string());
        let handle = self
            .in_flight
            .lock()
            .await
            .get_mut(&key)
            .and_then(|entry| entry.handle.take());

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Diagnosis task for image {} panicked: {}", image_id, e);
                }
            }
        }

        self.store
            .read()
            .await
            .find_image(patient_id, report_id, image_id)
            .and_then(|image| image.ai_diagnosis.clone())
    }

    /// 在途请求数量
    pub async fn pending_requests(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// 取消全部在途请求，影像保持进行中状态
    pub async fn cancel_all(&self) {
        let mut in_flight = self.in_flight.lock().await;
        for (_, entry) in in_flight.drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
    }
}

async fn run_request(
    store: Arc<RwLock<RecordStore>>,
    provider: Arc<dyn DiagnosisProvider>,
    in_flight: InFlightMap,
    request_timeout: Duration,
    key: ImageKey,
    ticket: u64,
    request: DiagnosisRequest,
) {
    let event = match tokio::time::timeout(request_timeout, provider.diagnose(request)).await {
        Ok(Ok(raw)) => match parse_diagnosis_response(&raw) {
            Ok(diagnosis) => DiagnosisEvent::Succeeded(diagnosis),
            Err(e) => {
                error!("Invalid response from {}: {}", provider.name(), e);
                DiagnosisEvent::Failed
            }
        },
        Ok(Err(e)) => {
            error!("Error getting AI diagnosis from {}: {}", provider.name(), e);
            DiagnosisEvent::Failed
        }
        Err(_) => {
            warn!(
                "Diagnosis request for image {} timed out after {:?}",
                key.2, request_timeout
            );
            DiagnosisEvent::Failed
        }
    };

    // 持有在途表的锁直到写回完成，被替换的请求不会覆盖新结果
    let mut in_flight = in_flight.lock().await;
    match in_flight.get(&key) {
        Some(entry) if entry.ticket == ticket => {
            in_flight.remove(&key);
        }
        _ => {
            debug!("Discarding superseded diagnosis result {} for image {}", ticket, key.2);
            return;
        }
    }

    let (patient_id, report_id, image_id) = &key;
    let result = store
        .write()
        .await
        .set_image_diagnosis(patient_id, report_id, image_id, event)
        .await;
    match result {
        Ok(Some(state)) => info!("Image {} diagnosis is now {:?}", image_id, state),
        Ok(None) => debug!("Image {} was removed before its diagnosis arrived", image_id),
        Err(e) => error!("Failed to store diagnosis for image {}: {}", image_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use endo_core::{Gender, NewPatient, NewReport, ProcedureType, SettingsPatch};
    use endo_storage::MemoryStore;
    use std::collections::VecDeque;

    /// 按顺序返回预设结果的提供方
    struct ScriptedProvider {
        replies: std::sync::Mutex<VecDeque<(Duration, anyhow::Result<String>)>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<(Duration, anyhow::Result<String>)>) -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl DiagnosisProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn diagnose(&self, request: DiagnosisRequest) -> anyhow::Result<String> {
            assert!(request.image_base64.is_some());
            let next = self.replies.lock().unwrap().pop_front();
            let (delay, reply) = next.unwrap_or((Duration::ZERO, Err(anyhow::anyhow!("no reply"))));
            tokio::time::sleep(delay).await;
            reply
        }
    }

    fn ok(diagnosis: &str) -> anyhow::Result<String> {
        Ok(format!("{{\"diagnosis\": \"{}\"}}", diagnosis))
    }

    async fn store_with_image() -> (Arc<RwLock<RecordStore>>, String, String) {
        let mut store = RecordStore::load(Arc::new(MemoryStore::new())).await;
        store
            .register_patient(NewPatient::new("P1", "Jane Doe", 40, Gender::Female))
            .await
            .unwrap();
        let report = store
            .add_report(
                "P1",
                NewReport::blank(ProcedureType::Gastroscopy, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()),
            )
            .await
            .unwrap();
        let image = store
            .add_image(
                "P1",
                &report.id,
                "stomach_antrum",
                "data:image/jpeg;base64,aGVsbG8=".to_string(),
                "Erosion".to_string(),
            )
            .await
            .unwrap()
            .unwrap();
        (Arc::new(RwLock::new(store)), report.id, image.id)
    }

    #[tokio::test]
    async fn test_successful_diagnosis() {
        let (store, report_id, image_id) = store_with_image().await;
        let coordinator = DiagnosisCoordinator::new(
            store.clone(),
            ScriptedProvider::new(vec![(Duration::from_millis(20), ok("Antral gastritis"))]),
        );

        coordinator.submit("P1", &report_id, &image_id).await.unwrap();
        {
            let store = store.read().await;
            let image = store.find_image("P1", &report_id, &image_id).unwrap();
            assert_eq!(image.ai_diagnosis, Some(AiDiagnosis::Pending));
        }

        let state = coordinator.wait("P1", &report_id, &image_id).await;
        assert_eq!(state, Some(AiDiagnosis::Resolved("Antral gastritis".to_string())));
        assert_eq!(coordinator.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_failures_mark_image_failed() {
        let (store, report_id, image_id) = store_with_image().await;
        let coordinator = DiagnosisCoordinator::new(
            store,
            ScriptedProvider::new(vec![
                (Duration::ZERO, Err(anyhow::anyhow!("quota exceeded"))),
                (Duration::ZERO, Ok("not json".to_string())),
            ]),
        );

        for _ in 0..2 {
            coordinator.submit("P1", &report_id, &image_id).await.unwrap();
            let state = coordinator.wait("P1", &report_id, &image_id).await;
            assert_eq!(state, Some(AiDiagnosis::Failed));
        }
    }

    #[tokio::test]
    async fn test_timeout_marks_image_failed() {
        let (store, report_id, image_id) = store_with_image().await;
        let coordinator = DiagnosisCoordinator::new(
            store,
            ScriptedProvider::new(vec![(Duration::from_secs(30), ok("Too late"))]),
        )
        .with_timeout(Duration::from_millis(50));

        coordinator.submit("P1", &report_id, &image_id).await.unwrap();
        let state = coordinator.wait("P1", &report_id, &image_id).await;
        assert_eq!(state, Some(AiDiagnosis::Failed));
    }

    #[tokio::test]
    async fn test_resubmission_replaces_earlier_request() {
        let (store, report_id, image_id) = store_with_image().await;
        let coordinator = DiagnosisCoordinator::new(
            store.clone(),
            ScriptedProvider::new(vec![
                (Duration::from_millis(200), ok("Stale answer")),
                (Duration::from_millis(10), ok("Fresh answer")),
            ]),
        );

        coordinator.submit("P1", &report_id, &image_id).await.unwrap();
        // 让第一个请求先取走预设回复
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.submit("P1", &report_id, &image_id).await.unwrap();
        assert_eq!(coordinator.pending_requests().await, 1);

        let state = coordinator.wait("P1", &report_id, &image_id).await;
        assert_eq!(state, Some(AiDiagnosis::Resolved("Fresh answer".to_string())));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let store = store.read().await;
        let image = store.find_image("P1", &report_id, &image_id).unwrap();
        assert_eq!(image.ai_diagnosis, Some(AiDiagnosis::Resolved("Fresh answer".to_string())));
    }

    #[tokio::test]
    async fn test_refused_when_ai_disabled() {
        let (store, report_id, image_id) = store_with_image().await;
        store
            .write()
            .await
            .update_settings(SettingsPatch {
                ai_enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        let coordinator = DiagnosisCoordinator::new(store.clone(), ScriptedProvider::new(Vec::new()));

        let result = coordinator.submit("P1", &report_id, &image_id).await;
        assert!(matches!(result, Err(EndoError::AiDisabled)));
        let store = store.read().await;
        assert!(store.find_image("P1", &report_id, &image_id).unwrap().ai_diagnosis.is_none());
    }

    #[tokio::test]
    async fn test_unknown_image_is_not_found() {
        let (store, report_id, _) = store_with_image().await;
        let coordinator = DiagnosisCoordinator::new(store, ScriptedProvider::new(Vec::new()));
        let result = coordinator.submit("P1", &report_id, "IMG-missing").await;
        assert!(matches!(result, Err(EndoError::NotFound(_))));
    }
}
