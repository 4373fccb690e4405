//! OpenAI-compatible image and diagram clients.
//!
//! [`OpenAiImageClient`] speaks the images API. The same client also serves
//! OpenAI-compatible third-party endpoints (`cipher`), which take the key
//! as a query parameter. [`OpenAiDiagramClient`] asks a chat model for
//! Mermaid or Graphviz source.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{build_client, check_status, strip_code_fence};
use super::traits::{DiagramOutput, DiagramProvider, ImageJob, ImageProvider};
use crate::types::{DiagramRequest, ImageData};
use crate::{AtelierError, Result};

/// Default base URL for the OpenAI API.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Default generation URL for the `cipher` endpoint.
pub const DEFAULT_CIPHER_URL: &str = "https://api.nofiltergpt.com/v1/images/generations";

const IMAGES_PATH: &str = "/v1/images/generations";
const CHAT_PATH: &str = "/v1/chat/completions";

const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const DEFAULT_IMAGE_QUALITY: &str = "standard";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPlacement {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `?api_key=<key>`
    Query,
}

// ============================================================================
// Images
// ============================================================================

#[derive(Clone)]
pub struct OpenAiImageClient {
    name: String,
    api_key: String,
    http: Client,
    url: String,
    model: Option<String>,
    quality: Option<String>,
    default_size: String,
    key_placement: KeyPlacement,
}

impl OpenAiImageClient {
    /// DALL-E via the OpenAI API, registered as `openai`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_BASE_URL)
    }

    /// Point at a different base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let base = base_url.into();
        Ok(Self {
            name: "openai".into(),
            api_key: api_key.into(),
            http: build_client()?,
            url: format!("{}{IMAGES_PATH}", base.trim_end_matches('/')),
            model: Some(DEFAULT_IMAGE_MODEL.into()),
            quality: Some(DEFAULT_IMAGE_QUALITY.into()),
            default_size: DEFAULT_IMAGE_SIZE.into(),
            key_placement: KeyPlacement::Bearer,
        })
    }

    /// OpenAI-compatible endpoint taking the key as a query parameter,
    /// registered as `cipher`. `url` is the full generation URL.
    pub fn cipher(api_key: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: "cipher".into(),
            api_key: api_key.into(),
            http: build_client()?,
            url: url.into().trim_end_matches('/').to_string(),
            model: None,
            quality: None,
            default_size: DEFAULT_IMAGE_SIZE.into(),
            key_placement: KeyPlacement::Query,
        })
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn default_size(mut self, size: impl Into<String>) -> Self {
        self.default_size = size.into();
        self
    }

    fn request_count(&self, n: u32) -> u32 {
        // dall-e-3 accepts a single image per request.
        match self.model.as_deref() {
            Some("dall-e-3") => 1,
            _ => n.max(1),
        }
    }
}

#[derive(Serialize)]
struct ImagesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[async_trait]
impl ImageProvider for OpenAiImageClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_images(&self, job: &ImageJob) -> Result<Vec<ImageData>> {
        let body = ImagesRequest {
            model: self.model.as_deref(),
            prompt: &job.prompt,
            n: self.request_count(job.n),
            size: job.size.as_deref().unwrap_or(&self.default_size),
            quality: self.quality.as_deref(),
            response_format: (self.key_placement == KeyPlacement::Bearer).then_some("b64_json"),
        };

        let mut request = self.http.post(&self.url).json(&body);
        request = match self.key_placement {
            KeyPlacement::Bearer => request.bearer_auth(&self.api_key),
            KeyPlacement::Query => request.query(&[("api_key", self.api_key.as_str())]),
        };

        let response = check_status(&self.name, request.send().await?).await?;
        let parsed: ImagesResponse = response.json().await?;
        if parsed.data.is_empty() {
            return Err(AtelierError::EmptyResponse);
        }
        Ok(parsed.data)
    }
}

// ============================================================================
// Diagrams
// ============================================================================

pub(crate) fn diagram_system_prompt(request: &DiagramRequest) -> String {
    let ty = request.diagram_type.as_str();
    format!(
        "You are an expert at creating {ty} diagrams for technical documentation.\n\
         Generate ONLY the {ty} code, nothing else - no markdown, no explanations, just the raw code.\n\
         Make it clear, professional, and suitable for technical blog posts about software \
         architecture, microservices, and workflows.\n\n\
         Diagram type: {kind}\nFormat: {ty}",
        kind = request.diagram_kind,
    )
}

pub(crate) fn diagram_user_prompt(request: &DiagramRequest, description: &str) -> String {
    let ty = request.diagram_type.as_str();
    format!(
        "Create a {ty} {kind} diagram for the following:\n{description}\n\n\
         Return ONLY the {ty} code, no markdown formatting, no explanations.",
        kind = request.diagram_kind,
    )
}

#[derive(Clone)]
pub struct OpenAiDiagramClient {
    api_key: String,
    http: Client,
    base_url: String,
    model: String,
}

impl OpenAiDiagramClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_CHAT_MODEL.into(),
        })
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl DiagramProvider for OpenAiDiagramClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate_diagram(
        &self,
        request: &DiagramRequest,
        description: &str,
    ) -> Result<DiagramOutput> {
        let system = diagram_system_prompt(request);
        let user = diagram_user_prompt(request, description);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.3,
        };

        let response = self
            .http
            .post(format!("{}{CHAT_PATH}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: ChatResponse = check_status("openai", response).await?.json().await?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(AtelierError::EmptyResponse)?;

        Ok(DiagramOutput {
            code: strip_code_fence(&content),
            b64_json: None,
        })
    }
}
