//! Anthropic messages API client for diagram source.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{build_client, check_status, strip_code_fence};
use super::openai::{diagram_system_prompt, diagram_user_prompt};
use super::traits::{DiagramOutput, DiagramProvider};
use crate::types::DiagramRequest;
use crate::{AtelierError, Result};

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const MAX_TOKENS: u32 = 2000;

#[derive(Clone)]
pub struct AnthropicDiagramClient {
    api_key: String,
    http: Client,
    base_url: String,
    model: String,
}

impl AnthropicDiagramClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_ANTHROPIC_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.into(),
        })
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl DiagramProvider for AnthropicDiagramClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate_diagram(
        &self,
        request: &DiagramRequest,
        description: &str,
    ) -> Result<DiagramOutput> {
        let system = diagram_system_prompt(request);
        let user = diagram_user_prompt(request, description);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: &system,
            messages: [UserMessage {
                role: "user",
                content: &user,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let parsed: MessagesResponse = check_status("anthropic", response).await?.json().await?;

        let text = parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(AtelierError::EmptyResponse)?;

        Ok(DiagramOutput {
            code: strip_code_fence(&text),
            b64_json: None,
        })
    }
}
