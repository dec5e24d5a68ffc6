//! DeepSeek chat-completion client for tashkeel, correction, and vision OCR.

use std::env;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "deepseek-chat";
const DEFAULT_OCR_MODEL: &str = "deepseek-vl2";

const MAX_TOKENS: u32 = 4000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which class of linguistic errors a correction request should fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionType {
    Spelling,
    Grammar,
    #[default]
    All,
}

/// Unrecognized subtypes fall back to full correction.
impl<'de> Deserialize<'de> for CorrectionType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "spelling" => CorrectionType::Spelling,
            "grammar" => CorrectionType::Grammar,
            _ => CorrectionType::All,
        })
    }
}

impl CorrectionType {
    pub fn mode(self) -> TaskMode {
        match self {
            CorrectionType::Spelling => TaskMode::CorrectSpelling,
            CorrectionType::Grammar => TaskMode::CorrectGrammar,
            CorrectionType::All => TaskMode::CorrectAll,
        }
    }
}

/// One of the five fixed instruction templates sent as the system role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    Tashkeel,
    CorrectSpelling,
    CorrectGrammar,
    CorrectAll,
    /// Second leg of the combined flow: re-shape already-corrected text.
    RetashkeelCorrected,
}

impl TaskMode {
    pub fn system_prompt(self) -> &'static str {
        match self {
            TaskMode::Tashkeel => {
                "أنت خبير في اللغة العربية والتشكيل. قم بتشكيل النص العربي بشكل دقيق مع الحفاظ على المعنى.\n\n\
                 التعليمات:\n\
                 1. شكل كل الكلمات بشكل صحيح\n\
                 2. حافظ على تنسيق النص الأصلي\n\
                 3. لا تضيف أي تعليقات إضافية\n\
                 4. أعد النص المشكول فقط دون أي إضافات\n\
                 5. تأكد من دقة التشكيل النحوي"
            }
            TaskMode::CorrectSpelling => {
                "أنت خبير في اللغة العربية متخصص في تصحيح الأخطاء الإملائية فقط.\n\n\
                 التعليمات الصارمة:\n\
                 1. ركز فقط على الأخطاء الإملائية (هجاء الكلمات)\n\
                 2. لا تقم بتغيير التراكيب النحوية\n\
                 3. حافظ على المعنى الأصلي تماماً\n\
                 4. أعد النص المصحح إملائياً فقط\n\
                 5. لا تضيف أي شروحات أو تعليقات"
            }
            TaskMode::CorrectGrammar => {
                "أنت خبير في اللغة العربية متخصص في تصحيح الأخطاء النحوية فقط.\n\n\
                 التعليمات الصارمة:\n\
                 1. ركز فقط على الأخطاء النحوية (الإعراب والتراكيب)\n\
                 2. لا تقم بتغيير الهجاء الإملائي\n\
                 3. حافظ على المعنى الأصلي تماماً\n\
                 4. أعد النص المصحح نحوياً فقط\n\
                 5. لا تضيف أي شروحات أو تعليقات"
            }
            TaskMode::CorrectAll => {
                "أنت خبير في اللغة العربية متخصص في تصحيح الأخطاء اللغوية الشاملة.\n\n\
                 التعليمات الصارمة:\n\
                 1. صحح الأخطاء الإملائية والنحوية معاً\n\
                 2. حافظ على المعنى الأصلي تماماً\n\
                 3. أعد النص المصحح كاملاً\n\
                 4. لا تضيف أي شروحات أو تعليقات\n\
                 5. ركز على الدقة اللغوية"
            }
            TaskMode::RetashkeelCorrected => {
                "أنت خبير في اللغة العربية والتشكيل. قم بتشكيل النص العربي بشكل دقيق.\n\n\
                 التعليمات:\n\
                 1. شكل كل الكلمات بشكل صحيح\n\
                 2. حافظ على تنسيق النص الأصلي\n\
                 3. لا تضيف أي تعليقات إضافية\n\
                 4. أعد النص المشكول فقط"
            }
        }
    }

    /// User-role message embedding the input verbatim.
    pub fn user_prompt(self, text: &str) -> String {
        match self {
            TaskMode::Tashkeel | TaskMode::RetashkeelCorrected => {
                format!("قم بتشكيل هذا النص العربي تشكيلاً كاملاً وصحيحاً:\n\n{}", text)
            }
            TaskMode::CorrectSpelling | TaskMode::CorrectGrammar | TaskMode::CorrectAll => {
                format!("قم بتصحيح هذا النص العربي حسب التعليمات بدقة:\n\n{}", text)
            }
        }
    }

    /// Corrections run colder than shaping.
    pub fn temperature(self) -> f32 {
        match self {
            TaskMode::Tashkeel | TaskMode::RetashkeelCorrected => 0.3,
            TaskMode::CorrectSpelling | TaskMode::CorrectGrammar | TaskMode::CorrectAll => 0.2,
        }
    }
}

/// Chat-completion client. Every call is a single bounded request:
/// no retries, no streaming, 30-second ceiling.
#[derive(Clone)]
pub struct DeepSeekClient {
    client: Client,
    api_key: String,
    model: String,
    ocr_model: String,
    base_url: String,
}

impl DeepSeekClient {
    /// Create a client, reading the API key from `DEEPSEEK_API_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let api_key = env::var("DEEPSEEK_API_KEY")
            .context("DEEPSEEK_API_KEY environment variable not set")?;

        let mut client = Self::new(api_key);
        if let Ok(url) = env::var("DEEPSEEK_API_URL") {
            client = client.with_base_url(url);
        }
        if let Ok(model) = env::var("DEEPSEEK_MODEL") {
            client = client.with_model(model);
        }
        if let Ok(model) = env::var("DEEPSEEK_OCR_MODEL") {
            client.ocr_model = model;
        }
        Ok(client)
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static configuration");

        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            base_url: DEEPSEEK_API_URL.to_string(),
        }
    }

    /// Point the client at a different completions endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Run one instruction template over `text`, returning the trimmed
    /// first choice.
    pub async fn complete(&self, mode: TaskMode, text: &str) -> Result<String, AppError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(mode.system_prompt()),
                Message::user(mode.user_prompt(text)),
            ],
            temperature: mode.temperature(),
            max_tokens: MAX_TOKENS,
        };

        self.send(request).await
    }

    /// Recognize Arabic text in a preprocessed image via a vision-capable
    /// model. The image travels inline as a base64 data URL.
    pub async fn recognize_image(&self, jpeg_bytes: &[u8]) -> Result<String, AppError> {
        let request = ChatCompletionRequest {
            model: self.ocr_model.clone(),
            messages: vec![
                Message::system(
                    "أنت نظام تعرف ضوئي على الحروف العربية. اقرأ النص في الصورة وأعده كما هو دون أي شرح أو تعليق.",
                ),
                Message::user_with_image("اقرأ النص العربي في هذه الصورة وأعده فقط:", jpeg_bytes),
            ],
            temperature: 0.2,
            max_tokens: MAX_TOKENS,
        };

        self.send(request).await
    }

    async fn send(&self, request: ChatCompletionRequest) -> Result<String, AppError> {
        debug!(model = %request.model, temperature = request.temperature, "sending completion request");

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "completion endpoint returned an error");
            return Err(match status {
                StatusCode::UNAUTHORIZED => AppError::InvalidCredential,
                StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited,
                _ => AppError::ProcessingFailed(format!("upstream status {}", status)),
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|_| AppError::MalformedUpstreamResponse)?;

        if let Some(usage) = &completion.usage {
            info!(
                total = usage.total_tokens,
                prompt = usage.prompt_tokens,
                completion = usage.completion_tokens,
                "completion tokens"
            );
        }

        // The response shape is not trusted: a missing first choice or a
        // null content is a typed error, not a panic.
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(AppError::MalformedUpstreamResponse)?;

        Ok(content.trim().to_string())
    }
}

fn classify_transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() || err.is_connect() {
        AppError::ServiceUnreachable
    } else {
        AppError::ProcessingFailed(err.to_string())
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// User message carrying a prompt plus one inline JPEG.
    pub fn user_with_image(text: impl Into<String>, jpeg_bytes: &[u8]) -> Self {
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg_bytes));
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }
    }
}
