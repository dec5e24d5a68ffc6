//! Request orchestration: sequencing model calls and recording history.
//!
//! Every entry point issues its downstream call(s), then appends exactly
//! one history item on success. Failures never mutate history.

use std::path::Path;

use tracing::{info, warn};

use crate::deepseek::{CorrectionType, DeepSeekClient, TaskMode};
use crate::error::{AppError, AppResult};
use crate::extract;
use crate::history::{HistoryItem, HistoryStore};

pub struct TashkeelService {
    client: DeepSeekClient,
    history: HistoryStore,
}

#[derive(Debug)]
pub struct CombinedResult {
    pub corrected: String,
    pub shaped: String,
    pub history_id: i64,
}

#[derive(Debug, Clone)]
pub struct UploadMeta {
    pub file_name: String,
    pub media_type: String,
    pub size: u64,
}

#[derive(Debug)]
pub struct UploadResult {
    pub extracted: String,
    pub shaped: String,
    pub history_id: i64,
}

impl TashkeelService {
    pub fn new(client: DeepSeekClient, history: HistoryStore) -> Self {
        Self { client, history }
    }

    /// Diacritize `text` and record the operation.
    pub async fn tashkeel(&self, text: &str) -> AppResult<(String, i64)> {
        info!(chars = text.chars().count(), "tashkeel request");

        let shaped = self.client.complete(TaskMode::Tashkeel, text).await?;
        let id = self.history.append(HistoryItem::tashkeel(text, &shaped));
        Ok((shaped, id))
    }

    /// Correct `text` in the requested sub-mode. Only the first line of
    /// the reply is kept, dropping any explanatory continuation.
    pub async fn correct(&self, text: &str, correction_type: CorrectionType) -> AppResult<(String, i64)> {
        info!(chars = text.chars().count(), ?correction_type, "correction request");

        let reply = self.client.complete(correction_type.mode(), text).await?;
        let corrected = reply.lines().next().unwrap_or_default().to_string();
        let id = self
            .history
            .append(HistoryItem::correction(correction_type, text, &corrected));
        Ok((corrected, id))
    }

    /// Correct, then re-shape the corrected text. Strictly ordered: the
    /// second call consumes the first call's output.
    pub async fn tashkeel_and_correct(&self, text: &str) -> AppResult<CombinedResult> {
        info!(chars = text.chars().count(), "combined request");

        let corrected = self.client.complete(TaskMode::CorrectAll, text).await?;
        let shaped = self
            .client
            .complete(TaskMode::RetashkeelCorrected, &corrected)
            .await?;

        let history_id = self
            .history
            .append(HistoryItem::combined(text, &corrected, &shaped));

        Ok(CombinedResult {
            corrected,
            shaped,
            history_id,
        })
    }

    /// Extract text from an uploaded file and diacritize it. The file is
    /// deleted exactly once, whatever the outcome.
    pub async fn upload_and_tashkeel(&self, path: &Path, meta: UploadMeta) -> AppResult<UploadResult> {
        let outcome = self.process_upload(path, &meta).await;

        if let Err(err) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), %err, "failed to delete uploaded file");
        }

        outcome
    }

    async fn process_upload(&self, path: &Path, meta: &UploadMeta) -> AppResult<UploadResult> {
        info!(file = %meta.file_name, media_type = %meta.media_type, size = meta.size, "upload request");

        let extracted = extract::extract_text(path, &meta.media_type, &self.client).await?;
        if extracted.is_empty() {
            return Err(AppError::InvalidInput(
                "لم يتم العثور على نص في الملف".to_string(),
            ));
        }

        let shaped = self.client.complete(TaskMode::Tashkeel, &extracted).await?;

        let history_id = self.history.append(HistoryItem::upload(
            &meta.file_name,
            &meta.media_type,
            meta.size,
            &extracted,
            &shaped,
        ));

        Ok(UploadResult {
            extracted,
            shaped,
            history_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::OperationKind;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    /// In-process stand-in for the completions endpoint: records every
    /// request body and pops canned replies in order.
    #[derive(Clone)]
    struct Stub {
        requests: Arc<Mutex<Vec<serde_json::Value>>>,
        replies: Arc<Mutex<Vec<(u16, serde_json::Value)>>>,
    }

    async fn completions(
        State(stub): State<Stub>,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        stub.requests.lock().unwrap().push(body);
        let (status, reply) = stub.replies.lock().unwrap().remove(0);
        (StatusCode::from_u16(status).unwrap(), Json(reply))
    }

    async fn spawn_stub(
        replies: Vec<(u16, serde_json::Value)>,
    ) -> (String, Arc<Mutex<Vec<serde_json::Value>>>) {
        let stub = Stub {
            requests: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(replies)),
        };
        let requests = stub.requests.clone();

        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/v1/chat/completions", addr), requests)
    }

    fn reply(content: &str) -> (u16, serde_json::Value) {
        (
            200,
            serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
            }),
        )
    }

    fn service_at(url: &str) -> TashkeelService {
        let client = DeepSeekClient::new("test-key").with_base_url(url);
        TashkeelService::new(client, HistoryStore::new())
    }

    #[tokio::test]
    async fn tashkeel_trims_reply_and_records_history() {
        let (url, _) = spawn_stub(vec![reply("  السَّلامُ عَلَيْكُم  ")]).await;
        let service = service_at(&url);

        let (shaped, id) = service.tashkeel("السلام عليكم").await.unwrap();

        assert_eq!(shaped, "السَّلامُ عَلَيْكُم");
        assert_eq!(service.history.len(), 1);
        let item = &service.history.list(1)[0];
        assert_eq!(item.id, id);
        assert_eq!(item.kind, OperationKind::Tashkeel);
        assert_eq!(item.original, "السلام عليكم");
    }

    #[tokio::test]
    async fn correction_keeps_only_the_first_line() {
        let (url, _) = spawn_stub(vec![reply("السلام عليكم\nملاحظة: لا توجد أخطاء إملائية.")]).await;
        let service = service_at(&url);

        let (corrected, _) = service
            .correct("السلام عليكم", CorrectionType::Spelling)
            .await
            .unwrap();

        assert_eq!(corrected, "السلام عليكم");
        let item = &service.history.list(1)[0];
        assert_eq!(item.correction_type, Some(CorrectionType::Spelling));
        assert_eq!(item.corrected.as_deref(), Some("السلام عليكم"));
    }

    #[tokio::test]
    async fn combined_mode_chains_correction_into_tashkeel() {
        let (url, requests) = spawn_stub(vec![reply("نص مصحح"), reply("نَصٌّ مُصَحَّح")]).await;
        let service = service_at(&url);

        let result = service.tashkeel_and_correct("نص مغلوط").await.unwrap();

        assert_eq!(result.corrected, "نص مصحح");
        assert_eq!(result.shaped, "نَصٌّ مُصَحَّح");

        let seen = requests.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // First leg corrects, second leg re-shapes the first leg's output.
        let first_system = seen[0]["messages"][0]["content"].as_str().unwrap();
        assert_eq!(first_system, TaskMode::CorrectAll.system_prompt());
        let second_system = seen[1]["messages"][0]["content"].as_str().unwrap();
        assert_eq!(second_system, TaskMode::RetashkeelCorrected.system_prompt());
        let second_user = seen[1]["messages"][1]["content"].as_str().unwrap();
        assert!(second_user.ends_with("نص مصحح"));

        let item = &service.history.list(1)[0];
        assert_eq!(item.kind, OperationKind::TashkeelAndCorrect);
        assert_eq!(item.corrected.as_deref(), Some("نص مصحح"));
        assert_eq!(item.shaped.as_deref(), Some("نَصٌّ مُصَحَّح"));
    }

    #[tokio::test]
    async fn invalid_credential_leaves_history_unchanged() {
        let (url, _) = spawn_stub(vec![(401, serde_json::json!({"error": "invalid key"}))]).await;
        let service = service_at(&url);

        let err = service.tashkeel("نص").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential));
        assert!(service.history.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_classified() {
        let (url, _) = spawn_stub(vec![(429, serde_json::json!({"error": "slow down"}))]).await;
        let service = service_at(&url);

        let err = service.tashkeel("نص").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited));
    }

    #[tokio::test]
    async fn missing_choice_is_a_malformed_response() {
        let (url, _) = spawn_stub(vec![(200, serde_json::json!({"choices": []}))]).await;
        let service = service_at(&url);

        let err = service.tashkeel("نص").await.unwrap_err();
        assert!(matches!(err, AppError::MalformedUpstreamResponse));
        assert!(service.history.is_empty());
    }

    #[tokio::test]
    async fn combined_failure_on_second_leg_records_nothing() {
        let (url, _) = spawn_stub(vec![
            reply("نص مصحح"),
            (500, serde_json::json!({"error": "boom"})),
        ])
        .await;
        let service = service_at(&url);

        let err = service.tashkeel_and_correct("نص").await.unwrap_err();
        assert!(matches!(err, AppError::ProcessingFailed(_)));
        assert!(service.history.is_empty());
    }

    #[tokio::test]
    async fn upload_extracts_shapes_and_deletes_the_file() {
        let (url, _) = spawn_stub(vec![reply("نَصٌ مِنْ مِلَفّ")]).await;
        let service = service_at(&url);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("123-0.txt");
        std::fs::write(&path, "نص  من\nملف").unwrap();

        let meta = UploadMeta {
            file_name: "وثيقة.txt".to_string(),
            media_type: "text/plain".to_string(),
            size: 17,
        };
        let result = service.upload_and_tashkeel(&path, meta).await.unwrap();

        assert_eq!(result.extracted, "نص من ملف");
        assert_eq!(result.shaped, "نَصٌ مِنْ مِلَفّ");
        assert!(!path.exists(), "uploaded file must be deleted");

        let item = &service.history.list(1)[0];
        assert_eq!(item.file_name.as_deref(), Some("وثيقة.txt"));
        assert_eq!(item.file_size, Some(17));
    }

    #[tokio::test]
    async fn empty_extraction_is_an_input_error_and_still_deletes() {
        let (url, requests) = spawn_stub(vec![]).await;
        let service = service_at(&url);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("456-0.txt");
        std::fs::write(&path, "   \n\t ").unwrap();

        let meta = UploadMeta {
            file_name: "فارغ.txt".to_string(),
            media_type: "text/plain".to_string(),
            size: 7,
        };
        let err = service.upload_and_tashkeel(&path, meta).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(!path.exists(), "file is deleted on the failure path too");
        assert!(service.history.is_empty());
        assert!(requests.lock().unwrap().is_empty(), "no model call for empty text");
    }
}
