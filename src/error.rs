//! Application error taxonomy and JSON error response mapping.
//!
//! Every failure that crosses the request boundary becomes a uniform
//! `{"success": false, "error": "..."}` body with a localized Arabic
//! message. Internal causes are logged, never surfaced to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or empty request input. Message is endpoint-specific.
    #[error("{0}")]
    InvalidInput(String),

    #[error("نوع الملف غير مدعوم")]
    UnsupportedFileType,

    #[error("صيغة التصدير غير مدعومة")]
    UnsupportedExportFormat,

    /// A decoder failed; tagged with the attempted format only.
    #[error("فشل في استخراج النص من {format}")]
    ExtractionFailed { format: &'static str },

    #[error("لا يمكن الاتصال بالخادم")]
    ServiceUnreachable,

    #[error("مفتاح API غير صالح")]
    InvalidCredential,

    #[error("تم تجاوز الحد المسموح لطلبات API")]
    RateLimited,

    /// The completion endpoint answered with a body we cannot interpret.
    #[error("استجابة غير صالحة من خدمة المعالجة")]
    MalformedUpstreamResponse,

    #[error("حدث خطأ أثناء معالجة النص")]
    ProcessingFailed(String),

    #[error("فشل في تصدير الملف")]
    ExportFailed(String),

    #[error("الملف غير موجود")]
    FileNotFound,

    #[error("خطأ في نظام الملفات")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_)
            | AppError::UnsupportedFileType
            | AppError::UnsupportedExportFormat => StatusCode::BAD_REQUEST,
            AppError::FileNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Detail that must not reach the client still lands in the log.
        match &self {
            AppError::ProcessingFailed(detail) | AppError::ExportFailed(detail) => {
                tracing::error!(%status, %detail, "request failed");
            }
            AppError::Io(source) => {
                tracing::error!(%status, %source, "request failed");
            }
            other => {
                tracing::warn!(%status, error = %other, "request failed");
            }
        }

        let body = json!({
            "success": false,
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_bad_request() {
        assert_eq!(
            AppError::InvalidInput("نص فارغ".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::UnsupportedFileType.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::UnsupportedExportFormat.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        assert_eq!(AppError::FileNotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_failures_are_internal() {
        for err in [
            AppError::ServiceUnreachable,
            AppError::InvalidCredential,
            AppError::RateLimited,
            AppError::MalformedUpstreamResponse,
            AppError::ExtractionFailed { format: "PDF" },
        ] {
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn extraction_failed_names_the_format() {
        let err = AppError::ExtractionFailed { format: "الصورة" };
        assert_eq!(err.to_string(), "فشل في استخراج النص من الصورة");
    }

    #[test]
    fn invalid_input_keeps_its_message() {
        let err = AppError::InvalidInput("الرجاء إدخال نص لتشكيله".into());
        assert_eq!(err.to_string(), "الرجاء إدخال نص لتشكيله");
    }
}
