use serde::{Deserialize, Serialize};

use crate::router::CostMode;
use crate::{AtelierError, Result};

/// Visual style applied to an image prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    #[default]
    Technical,
    Diagram,
    Thumbnail,
    Illustration,
}

impl ImageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageStyle::Technical => "technical",
            ImageStyle::Diagram => "diagram",
            ImageStyle::Thumbnail => "thumbnail",
            ImageStyle::Illustration => "illustration",
        }
    }

    /// Descriptor appended to prompts by providers that support style hints.
    pub fn descriptor(self) -> &'static str {
        match self {
            ImageStyle::Technical => {
                "professional, clean, modern, technical illustration, high quality, detailed"
            }
            ImageStyle::Diagram => {
                "schematic style, clear lines, minimal, professional diagram, technical drawing"
            }
            ImageStyle::Thumbnail => {
                "eye-catching thumbnail, bold colors, clean design, professional, social media ready"
            }
            ImageStyle::Illustration => {
                "beautiful illustration, detailed, professional, modern style, high quality"
            }
        }
    }

    /// `prompt` with the style descriptor and optional context appended.
    pub fn enhance(self, prompt: &str, context: Option<&str>) -> String {
        let mut enhanced = format!("{prompt}, {}", self.descriptor());
        if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
            enhanced.push_str(", context: ");
            enhanced.push_str(ctx);
        }
        enhanced
    }
}

fn default_image_provider() -> String {
    "openai".to_string()
}

fn default_n() -> u32 {
    1
}

/// Image generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    pub prompt: String,
    /// Provider-specific size hint, e.g. `1024x1024`.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub style: ImageStyle,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_n")]
    pub n: u32,
    /// Ranking used when `provider` is `auto` or not routable.
    #[serde(default)]
    pub cost_mode: CostMode,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            provider: default_image_provider(),
            prompt: prompt.into(),
            size: None,
            style: ImageStyle::default(),
            context: None,
            n: default_n(),
            cost_mode: CostMode::default(),
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn style(mut self, style: ImageStyle) -> Self {
        self.style = style;
        self
    }

    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(AtelierError::InvalidInput("n must be at least 1".into()));
        }
        Ok(())
    }
}

/// One generated image: a hosted URL, an inline base64 payload, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
}

impl ImageData {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            b64_json: None,
        }
    }

    pub fn inline(b64: impl Into<String>) -> Self {
        Self {
            url: None,
            b64_json: Some(b64.into()),
        }
    }

    pub fn has_content(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
            || self.b64_json.as_deref().is_some_and(|b| !b.is_empty())
    }
}

/// Image generation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub data: Vec<ImageData>,
    pub provider: String,
    pub prompt: String,
}
