//! Plain-text extraction from uploaded documents.
//!
//! Dispatch is a fixed mapping from the declared media type (with an
//! extension fallback for ODT) to one of five handlers. Every path
//! collapses whitespace runs to single spaces and trims the result.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use image::imageops::FilterType;
use regex::Regex;
use tracing::{debug, warn};

use crate::deepseek::DeepSeekClient;
use crate::error::{AppError, AppResult};

/// Longest image edge fed to the OCR model.
const OCR_MAX_DIMENSION: u32 = 2000;

const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "application/vnd.oasis.opendocument.text",
    "image/jpeg",
    "image/png",
    "image/jpg",
    "text/plain",
];

const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "odt", "jpg", "jpeg", "png", "txt"];

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Upload whitelist: both the declared media type and the extension must
/// match. Checked at the request boundary, before anything touches disk.
pub fn is_supported(file_name: &str, media_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&media_type)
        && ALLOWED_EXTENSIONS.contains(&extension_of(file_name).as_str())
}

/// Extract plain text from `path` according to the declared media type.
pub async fn extract_text(
    path: &Path,
    media_type: &str,
    ocr: &DeepSeekClient,
) -> AppResult<String> {
    let text = match media_type {
        "application/pdf" => from_pdf(path)?,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/msword" => from_docx(path)?,
        "application/vnd.oasis.opendocument.text" => from_odt(path)?,
        "image/jpeg" | "image/png" | "image/jpg" => from_image(path, ocr).await?,
        "text/plain" => from_plain_text(path)?,
        _ => {
            // Some browsers send ODT as a generic octet stream.
            if extension_of(&path.to_string_lossy()) == "odt" {
                from_odt(path)?
            } else {
                return Err(AppError::UnsupportedFileType);
            }
        }
    };

    Ok(collapse_whitespace(&text))
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn from_pdf(path: &Path) -> AppResult<String> {
    let doc = lopdf::Document::load(path).map_err(|err| {
        warn!(%err, "failed to load PDF");
        AppError::ExtractionFailed { format: "PDF" }
    })?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(content) = doc.extract_text(&[page_num]) {
            text.push_str(&content);
            text.push('\n');
        }
    }

    Ok(text)
}

fn from_docx(path: &Path) -> AppResult<String> {
    read_zip_entry(path, "word/document.xml")
        .map(|xml| strip_markup(&xml))
        .map_err(|err| {
            warn!(%err, "failed to read DOCX");
            AppError::ExtractionFailed { format: "ملف Word" }
        })
}

fn from_odt(path: &Path) -> AppResult<String> {
    read_zip_entry(path, "content.xml")
        .map(|xml| strip_markup(&xml))
        .map_err(|err| {
            warn!(%err, "failed to read ODT");
            AppError::ExtractionFailed { format: "ملف ODT" }
        })
}

/// Plain text is decoded lossily: stray non-UTF-8 bytes become
/// replacement characters instead of failing the upload.
fn from_plain_text(path: &Path) -> AppResult<String> {
    let bytes = std::fs::read(path).map_err(|err| {
        warn!(%err, "failed to read text file");
        AppError::ExtractionFailed { format: "الملف النصي" }
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Both DOCX and ODT are zip containers with one main XML part.
fn read_zip_entry(path: &Path, entry: &str) -> anyhow::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    archive.by_name(entry)?.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Drop all markup, keeping paragraph boundaries as whitespace.
fn strip_markup(xml: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

    // Paragraph/break closers become spaces so adjacent blocks don't fuse.
    let with_breaks = xml
        .replace("</w:p>", " ")
        .replace("</text:p>", " ")
        .replace("<w:tab/>", " ");
    tag.replace_all(&with_breaks, "").into_owned()
}

/// OCR path: resize to a bounded edge, grayscale, normalize contrast,
/// sharpen, then hand the JPEG to the vision model.
async fn from_image(path: &Path, ocr: &DeepSeekClient) -> AppResult<String> {
    let jpeg = preprocess_image(path).map_err(|err| {
        warn!(%err, "image preprocessing failed");
        AppError::ExtractionFailed { format: "الصورة" }
    })?;

    debug!(bytes = jpeg.len(), "sending preprocessed image to OCR model");

    ocr.recognize_image(&jpeg).await.map_err(|err| match err {
        // Credential/quota problems keep their own classification; anything
        // else reads as a plain extraction failure to the caller.
        AppError::ServiceUnreachable | AppError::InvalidCredential | AppError::RateLimited => err,
        _ => AppError::ExtractionFailed { format: "الصورة" },
    })
}

fn preprocess_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    let img = image::open(path)?;
    let img = img.resize(OCR_MAX_DIMENSION, OCR_MAX_DIMENSION, FilterType::Lanczos3);

    let mut gray = img.grayscale().to_luma8();
    imageproc::contrast::equalize_histogram_mut(&mut gray);
    let sharpened = image::imageops::unsharpen(&gray, 1.5, 4);

    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
    encoder.encode_image(&sharpened)?;
    Ok(jpeg)
}
