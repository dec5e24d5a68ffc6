//! Export of processed text to downloadable files.
//!
//! PDF and DOCX go through external converters (`wkhtmltopdf`, `soffice`)
//! fed with a fixed right-to-left HTML template; TXT is written verbatim;
//! JPEG is drawn line by line onto a fixed canvas. Exported files land in
//! the exports directory under a timestamp-qualified name and are only
//! removed by the bulk cleanup endpoint.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ab_glyph::{FontVec, PxScale};
use chrono::{Local, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::dirs::WorkDirs;
use crate::error::{AppError, AppResult};

const DEFAULT_FILE_NAME: &str = "النص-المشكول";

// Fixed JPEG canvas. Long lines clip at the left edge and excess lines
// run off the bottom; this mirrors the export contract, not a bug to fix
// here.
const CANVAS_WIDTH: u32 = 800;
const CANVAS_HEIGHT: u32 = 1200;
const FONT_SIZE: f32 = 20.0;
const LINE_PITCH: i32 = 30;
const RIGHT_EDGE: i32 = 750;
const FIRST_BASELINE: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Docx,
    Txt,
    Jpg,
}

impl ExportFormat {
    pub fn parse(format: &str) -> AppResult<Self> {
        match format {
            "pdf" => Ok(ExportFormat::Pdf),
            "docx" => Ok(ExportFormat::Docx),
            "txt" => Ok(ExportFormat::Txt),
            "jpg" => Ok(ExportFormat::Jpg),
            _ => Err(AppError::UnsupportedExportFormat),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
            ExportFormat::Txt => "txt",
            ExportFormat::Jpg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            ExportFormat::Txt => "text/plain",
            ExportFormat::Jpg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub file_path: String,
    pub download_name: String,
    pub mime_type: &'static str,
}

/// Strip everything outside letters, digits, the Arabic block, spaces,
/// hyphens, and underscores.
pub fn sanitize_file_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| {
        Regex::new(r"[^a-zA-Z0-9\x{0600}-\x{06FF}\s_-]").expect("valid character class")
    });

    let safe = unsafe_chars.replace_all(name, "").trim().to_string();
    if safe.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        safe
    }
}

/// Render `text` into the requested format and write it under exports/.
pub async fn export_text(
    text: &str,
    format: &str,
    requested_name: &str,
    dirs: &WorkDirs,
) -> AppResult<ExportResult> {
    let format = ExportFormat::parse(format)?;
    let safe_name = sanitize_file_name(requested_name);
    let stem = format!("{}-{}", safe_name, Utc::now().timestamp_millis());
    let out_path = dirs.exports.join(format!("{}.{}", stem, format.extension()));

    match format {
        ExportFormat::Pdf => html_to_pdf(text, &stem, &out_path, dirs).await?,
        ExportFormat::Docx => html_to_docx(text, &stem, dirs).await?,
        ExportFormat::Txt => tokio::fs::write(&out_path, text).await?,
        ExportFormat::Jpg => {
            let jpeg = render_text_jpeg(text)?;
            tokio::fs::write(&out_path, jpeg).await?;
        }
    }

    debug!(path = %out_path.display(), "export written");

    Ok(ExportResult {
        file_path: out_path.to_string_lossy().into_owned(),
        download_name: format!("{}.{}", safe_name, format.extension()),
        mime_type: format.mime_type(),
    })
}

/// The one RTL template every rendered format starts from.
fn html_template(text: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html dir="rtl" lang="ar">
<head>
  <meta charset="UTF-8">
  <style>
    body {{
      font-family: 'Arial', 'Times New Roman', serif;
      line-height: 1.8;
      font-size: 16px;
      text-align: right;
      margin: 2cm;
    }}
    .header {{
      text-align: center;
      margin-bottom: 2cm;
      border-bottom: 2px solid #333;
      padding-bottom: 1cm;
    }}
  </style>
</head>
<body>
  <div class="header">
    <h1>النص المشكول</h1>
    <p>تم التشكيل باستخدام مشكال - {}</p>
  </div>
  <div class="content">
    {}
  </div>
</body>
</html>
"#,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        text.replace('\n', "<br>")
    )
}

async fn write_temp_html(text: &str, stem: &str, dirs: &WorkDirs) -> AppResult<PathBuf> {
    let html_path = dirs.temp.join(format!("{}.html", stem));
    tokio::fs::write(&html_path, html_template(text)).await?;
    Ok(html_path)
}

async fn html_to_pdf(text: &str, stem: &str, out_path: &Path, dirs: &WorkDirs) -> AppResult<()> {
    let html_path = write_temp_html(text, stem, dirs).await?;

    let output = Command::new("wkhtmltopdf")
        .args([
            "--encoding",
            "utf-8",
            "--page-size",
            "A4",
            "--orientation",
            "Portrait",
            "--margin-top",
            "10mm",
            "--margin-bottom",
            "10mm",
            "--margin-left",
            "10mm",
            "--margin-right",
            "10mm",
        ])
        .arg(&html_path)
        .arg(out_path)
        .output()
        .await;

    discard_temp(&html_path).await;

    let output = output.map_err(|err| AppError::ExportFailed(format!("wkhtmltopdf: {}", err)))?;
    if !output.status.success() {
        return Err(AppError::ExportFailed(format!(
            "wkhtmltopdf exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// `soffice` names its output after the input stem, so the temp HTML file
/// already carries the final name.
async fn html_to_docx(text: &str, stem: &str, dirs: &WorkDirs) -> AppResult<()> {
    let html_path = write_temp_html(text, stem, dirs).await?;

    let output = Command::new("soffice")
        .args(["--headless", "--convert-to", "docx", "--outdir"])
        .arg(&dirs.exports)
        .arg(&html_path)
        .output()
        .await;

    discard_temp(&html_path).await;

    let output = output.map_err(|err| AppError::ExportFailed(format!("soffice: {}", err)))?;
    if !output.status.success() {
        return Err(AppError::ExportFailed(format!(
            "soffice exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

async fn discard_temp(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), %err, "failed to remove temp html");
    }
}

/// Draw the text line by line, right-aligned, onto a white canvas.
fn render_text_jpeg(text: &str) -> AppResult<Vec<u8>> {
    let font = load_font()?;
    let scale = PxScale::from(FONT_SIZE);

    let mut canvas = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgb([255, 255, 255]));
    let black = Rgb([0, 0, 0]);

    let mut y = FIRST_BASELINE;
    for line in text.lines() {
        if !line.is_empty() {
            let (width, _) = text_size(scale, &font, line);
            let x = RIGHT_EDGE - width as i32;
            draw_text_mut(&mut canvas, black, x, y, scale, &font, line);
        }
        y += LINE_PITCH;
    }

    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 80);
    encoder
        .encode_image(&canvas)
        .map_err(|err| AppError::ExportFailed(format!("jpeg encode: {}", err)))?;
    Ok(jpeg)
}

fn load_font() -> AppResult<FontVec> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(path) = std::env::var("MISHKAL_FONT") {
        candidates.push(PathBuf::from(path));
    }
    candidates.extend(
        [
            "/usr/share/fonts/truetype/noto/NotoNaskhArabic-Regular.ttf",
            "/usr/share/fonts/truetype/kacst/KacstBook.ttf",
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/Library/Fonts/Arial Unicode.ttf",
        ]
        .iter()
        .map(PathBuf::from),
    );

    for path in candidates {
        if let Ok(bytes) = std::fs::read(&path) {
            if let Ok(font) = FontVec::try_from_vec(bytes) {
                debug!(path = %path.display(), "loaded export font");
                return Ok(font);
            }
        }
    }

    Err(AppError::ExportFailed(
        "no usable font found; set MISHKAL_FONT".to_string(),
    ))
}
