//! Mishkal - Arabic tashkeel and correction server backed by DeepSeek.

mod deepseek;
mod dirs;
mod error;
mod export;
mod extract;
mod history;
mod service;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepseek::{CorrectionType, DeepSeekClient};
use dirs::{CleanupKind, WorkDirs};
use error::{AppError, AppResult};
use history::HistoryStore;
use service::{TashkeelService, UploadMeta};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<TashkeelService>,
    history: HistoryStore,
    dirs: Arc<WorkDirs>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mishkal_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let dirs = WorkDirs::new(".");
    dirs.ensure()?;

    let client = DeepSeekClient::from_env()?;
    info!("DeepSeek client initialized");

    let history = HistoryStore::new();
    let state = AppState {
        service: Arc::new(TashkeelService::new(client, history.clone())),
        history,
        dirs: Arc::new(dirs),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/api/tashkeel", post(tashkeel))
        .route("/api/correct-text", post(correct_text))
        .route("/api/tashkeel-and-correct", post(tashkeel_and_correct))
        .route("/api/upload-and-tashkeel", post(upload_and_tashkeel))
        .route("/api/export", post(export))
        .route("/api/download/:filename", get(download))
        .route("/api/history", get(get_history).delete(clear_history))
        .route("/api/history/:id", delete(delete_history_item))
        .route("/api/cleanup", post(cleanup))
        .route("/api/stats", get(stats))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Service banner with the endpoint map.
async fn index() -> Json<Value> {
    Json(json!({
        "message": "مرحباً بك في خدمة تشكيل وتصحيح النصوص العربية",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "tashkeel": "POST /api/tashkeel",
            "correction": "POST /api/correct-text",
            "tashkeel_and_correct": "POST /api/tashkeel-and-correct",
            "upload": "POST /api/upload-and-tashkeel",
            "export": "POST /api/export",
            "history": "GET /api/history",
            "cleanup": "POST /api/cleanup",
            "stats": "GET /api/stats"
        }
    }))
}

#[derive(Deserialize)]
struct TextRequest {
    #[serde(default)]
    text: String,
}

async fn tashkeel(
    State(state): State<AppState>,
    Json(req): Json<TextRequest>,
) -> AppResult<Json<Value>> {
    require_text(&req.text, "الرجاء إدخال نص لتشكيله")?;

    let (shaped, history_id) = state.service.tashkeel(&req.text).await?;
    Ok(Json(json!({
        "success": true,
        "result": shaped,
        "historyId": history_id,
    })))
}

#[derive(Deserialize)]
struct CorrectRequest {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "correctionType")]
    correction_type: CorrectionType,
}

async fn correct_text(
    State(state): State<AppState>,
    Json(req): Json<CorrectRequest>,
) -> AppResult<Json<Value>> {
    require_text(&req.text, "الرجاء إدخال نص لتصحيحه")?;

    let (corrected, history_id) = state.service.correct(&req.text, req.correction_type).await?;
    Ok(Json(json!({
        "success": true,
        "correctedText": corrected,
        "originalText": req.text,
        "correctionType": req.correction_type,
        "historyId": history_id,
    })))
}

async fn tashkeel_and_correct(
    State(state): State<AppState>,
    Json(req): Json<TextRequest>,
) -> AppResult<Json<Value>> {
    require_text(&req.text, "الرجاء إدخال نص لمعالجته")?;

    let result = state.service.tashkeel_and_correct(&req.text).await?;
    Ok(Json(json!({
        "success": true,
        "originalText": req.text,
        "correctedText": result.corrected,
        "shapedText": result.shaped,
        "historyId": result.history_id,
    })))
}

/// Multipart upload: validate, park the file under uploads/, then extract
/// and shape. The stored file is deleted by the service on every path.
async fn upload_and_tashkeel(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::InvalidInput(format!("خطأ في قراءة الطلب: {}", err)))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("document").to_string();
            let media_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|_| AppError::InvalidInput("فشل في قراءة الملف".to_string()))?;
            upload = Some((file_name, media_type, data.to_vec()));
            break;
        }
    }

    let Some((file_name, media_type, data)) = upload else {
        return Err(AppError::InvalidInput("لم يتم رفع أي ملف".to_string()));
    };
    if data.is_empty() {
        return Err(AppError::InvalidInput("لم يتم رفع أي ملف".to_string()));
    }
    // Whitelist check happens before anything touches the extractor.
    if !extract::is_supported(&file_name, &media_type) {
        return Err(AppError::UnsupportedFileType);
    }

    let stored = state.dirs.uploads.join(unique_upload_name(&file_name));
    tokio::fs::write(&stored, &data).await?;

    let meta = UploadMeta {
        file_name: file_name.clone(),
        media_type: media_type.clone(),
        size: data.len() as u64,
    };
    let result = state.service.upload_and_tashkeel(&stored, meta).await?;

    Ok(Json(json!({
        "success": true,
        "extractedText": result.extracted,
        "shapedText": result.shaped,
        "fileName": file_name,
        "fileType": media_type,
        "fileSize": data.len(),
        "historyId": result.history_id,
    })))
}

fn default_export_name() -> String {
    "النص-المشكول".to_string()
}

#[derive(Deserialize)]
struct ExportRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    format: String,
    #[serde(default = "default_export_name", rename = "fileName")]
    file_name: String,
}

async fn export(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> AppResult<Json<Value>> {
    if req.text.trim().is_empty() || req.format.is_empty() {
        return Err(AppError::InvalidInput(
            "النص وصيغة التصدير مطلوبة".to_string(),
        ));
    }

    let result = export::export_text(&req.text, &req.format, &req.file_name, &state.dirs).await?;
    Ok(Json(json!({
        "success": true,
        "filePath": result.file_path,
        "downloadName": result.download_name,
        "mimeType": result.mime_type,
    })))
}

async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<impl IntoResponse> {
    // Only bare file names: anything path-like cannot name an export.
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(AppError::FileNotFound);
    }

    let path = state.dirs.exports.join(&filename);
    if !path.is_file() {
        return Err(AppError::FileNotFound);
    }

    let bytes = tokio::fs::read(&path).await?;
    let mime = mime_for_extension(&extract::extension_of(&filename));

    let headers = [
        (header::CONTENT_TYPE, mime.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
        (header::CONTENT_LENGTH, bytes.len().to_string()),
    ];
    Ok((headers, bytes))
}

async fn get_history(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "history": state.history.list(20),
    }))
}

async fn delete_history_item(State(state): State<AppState>, Path(id): Path<i64>) -> Json<Value> {
    state.history.remove(id);
    Json(json!({ "success": true }))
}

async fn clear_history(State(state): State<AppState>) -> Json<Value> {
    state.history.clear();
    Json(json!({ "success": true }))
}

#[derive(Deserialize)]
struct CleanupRequest {
    #[serde(default, rename = "cleanupType")]
    cleanup_type: CleanupKind,
}

async fn cleanup(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> AppResult<Json<Value>> {
    let deleted = state.dirs.cleanup(req.cleanup_type)?;
    if req.cleanup_type == CleanupKind::All {
        state.history.clear();
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("تم محو {} ملفات", deleted),
        "deletedFiles": deleted,
    })))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "stats": {
            "exports": state.dirs.stats_for(&state.dirs.exports),
            "uploads": state.dirs.stats_for(&state.dirs.uploads),
            "temp": state.dirs.stats_for(&state.dirs.temp),
            "history": state.history.len(),
        }
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

fn require_text(text: &str, message: &str) -> AppResult<()> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidInput(message.to_string()));
    }
    Ok(())
}

/// Collision-free name for a parked upload: timestamp plus a process-wide
/// sequence number, keeping the original extension.
fn unique_upload_name(original: &str) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let ext = extract::extension_of(original);
    if ext.is_empty() {
        format!("{}-{}", millis, seq)
    } else {
        format!("{}-{}.{}", millis, seq, ext)
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_names_are_unique_and_keep_the_extension() {
        let a = unique_upload_name("تقرير.PDF");
        let b = unique_upload_name("تقرير.PDF");
        assert_ne!(a, b);
        assert!(a.ends_with(".pdf"));
        assert!(!unique_upload_name("noext").contains('.'));
    }

    #[test]
    fn download_mime_falls_back_to_octet_stream() {
        assert_eq!(mime_for_extension("pdf"), "application/pdf");
        assert_eq!(mime_for_extension("jpeg"), "image/jpeg");
        assert_eq!(mime_for_extension("bin"), "application/octet-stream");
    }

    #[test]
    fn require_text_rejects_whitespace_only_input() {
        assert!(require_text("  \n ", "رسالة").is_err());
        assert!(require_text("نص", "رسالة").is_ok());
    }
}
