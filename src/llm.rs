//! Completion provider abstraction and the Gemini client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{Result, TutorError};

const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Largest accepted upload (16 MiB).
pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

const SUPPORTED_IMAGE_FORMATS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("webp", "image/webp"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// An uploaded picture sent alongside a student's question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    /// Accepts png, jpg, jpeg, gif, bmp and webp files up to [`MAX_IMAGE_BYTES`].
    pub fn from_upload(file_name: &str, data: Vec<u8>) -> Result<Self> {
        if file_name.trim().is_empty() {
            return Err(TutorError::InvalidImage("no image file selected".into()));
        }
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        let Some((_, mime_type)) = SUPPORTED_IMAGE_FORMATS
            .iter()
            .find(|(ext, _)| *ext == extension)
        else {
            return Err(TutorError::InvalidImage(
                "unsupported file type, expected PNG, JPG, JPEG, GIF, BMP or WEBP".into(),
            ));
        };
        if data.is_empty() {
            return Err(TutorError::InvalidImage("image file is empty".into()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(TutorError::InvalidImage(format!(
                "image is {} bytes (maximum {MAX_IMAGE_BYTES})",
                data.len()
            )));
        }
        Ok(Self {
            mime_type: (*mime_type).to_string(),
            data,
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }
}

/// One role-tagged entry of the context sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    fn block_medium_and_above(category: &str) -> Self {
        Self {
            category: category.to_string(),
            threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        }
    }

    pub fn tutoring_defaults() -> Vec<Self> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(Self::block_medium_and_above)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub turns: Vec<Turn>,
    pub generation: GenerationConfig,
    pub safety: Vec<SafetySetting>,
}

impl CompletionRequest {
    /// Wraps turns with the fixed generation and safety parameters.
    pub fn tutoring(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            generation: GenerationConfig::default(),
            safety: SafetySetting::tutoring_defaults(),
        }
    }

    /// Image questions get a longer output budget.
    pub fn image_tutoring(turns: Vec<Turn>) -> Self {
        let mut request = Self::tutoring(turns);
        request.generation.max_output_tokens = 2048;
        request
    }
}

/// A text-generation endpoint turning ordered turns into a continuation.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

fn status_error(status: reqwest::StatusCode, body: &str) -> TutorError {
    let detail = serde_json::from_str::<GeminiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| body.to_string());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return TutorError::ProviderError(format!("gemini rate limit exceeded: {detail}"));
    }
    TutorError::ProviderError(format!("gemini request failed with {status}: {detail}"))
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Returns `Ok(None)` when no API key is configured.
    pub fn from_config(cfg: &ModelConfig) -> Result<Option<Self>> {
        let Some(api_key) = cfg
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        else {
            return Ok(None);
        };
        let endpoint = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|err| TutorError::Config(format!("http client error: {err}")))?;
        Ok(Some(Self {
            http,
            model: cfg.model.clone(),
            api_key: api_key.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }))
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint,
            self.model,
            urlencoding::encode(&self.api_key)
        )
    }

    fn to_contents(turns: &[Turn]) -> Vec<GeminiContent> {
        turns
            .iter()
            .map(|turn| {
                let mut parts = vec![GeminiPart::Text {
                    text: turn.text.clone(),
                }];
                if let Some(image) = &turn.image {
                    parts.push(GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.to_base64(),
                        },
                    });
                }
                GeminiContent {
                    role: turn.role,
                    parts,
                }
            })
            .collect()
    }
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let payload = GeminiRequest {
            contents: Self::to_contents(&request.turns),
            generation_config: &request.generation,
            safety_settings: &request.safety,
        };
        let resp = self
            .http
            .post(self.url())
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TutorError::ProviderTimeout(format!("gemini request: {}", err.without_url()))
                } else {
                    TutorError::ProviderUnavailable(format!(
                        "gemini request error: {}",
                        err.without_url()
                    ))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: GeminiResponse = resp.json().await.map_err(|err| {
            TutorError::MalformedResponse(format!("gemini response: {}", err.without_url()))
        })?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(TutorError::EmptyCompletion);
        };
        let text = candidate
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or_else(|| {
                TutorError::MalformedResponse("gemini candidate has no text part".into())
            })?;

        if text.trim().is_empty() {
            return Err(TutorError::EmptyCompletion);
        }
        Ok(text)
    }
}

/// A scripted provider used for tests and demos. Records every request.
#[derive(Default)]
pub struct StubProvider {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl StubProvider {
    pub fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: impl Into<String>) -> Arc<Self> {
        Self::new(vec![Ok(text.into())])
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(TutorError::ProviderError(
                    "StubProvider ran out of scripted responses".into(),
                ))
            })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent>,
    generation_config: &'a GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: TurnRole,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: Option<String>,
}
