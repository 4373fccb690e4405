//! Builder for configuring gateway instances

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::Gateway;
use crate::Result;
use crate::policy::{FilePolicySource, PolicySource, PolicyStore, StaticPolicySource};
use crate::providers::{DiagramProvider, ImageProvider, ProviderRegistry, VideoProvider};

/// Main entry point for creating gateway instances.
pub struct Atelier;

impl Atelier {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> AtelierBuilder {
        AtelierBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// Built-in HTTP clients are registered for every provider given a key.
/// Providers added with [`image_provider`](Self::image_provider) and
/// friends are registered afterwards and replace a built-in client of the
/// same name.
#[derive(Default)]
pub struct AtelierBuilder {
    policy_source: Option<Arc<dyn PolicySource>>,
    openai_key: Option<String>,
    openai_base_url: Option<String>,
    openai_image_model: Option<String>,
    openai_chat_model: Option<String>,
    cipher_key: Option<String>,
    cipher_url: Option<String>,
    replicate_key: Option<String>,
    replicate_base_url: Option<String>,
    anthropic_key: Option<String>,
    anthropic_base_url: Option<String>,
    anthropic_model: Option<String>,
    images: Vec<Arc<dyn ImageProvider>>,
    diagrams: Vec<Arc<dyn DiagramProvider>>,
    videos: Vec<Arc<dyn VideoProvider>>,
}

impl AtelierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where policy documents come from. Defaults to an empty in-memory
    /// source, i.e. built-in defaults for every domain.
    pub fn policy_source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.policy_source = Some(source);
        self
    }

    /// Read policy documents from `dir` (`routing.yaml`, `caching.yaml`, ...).
    pub fn policies_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.policy_source(Arc::new(FilePolicySource::new(dir)))
    }

    /// OpenAI images (`openai`) and chat-based diagrams.
    pub fn openai(mut self, api_key: impl Into<String>) -> Self {
        self.openai_key = Some(api_key.into());
        self
    }

    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = Some(url.into());
        self
    }

    pub fn openai_image_model(mut self, model: impl Into<String>) -> Self {
        self.openai_image_model = Some(model.into());
        self
    }

    pub fn openai_chat_model(mut self, model: impl Into<String>) -> Self {
        self.openai_chat_model = Some(model.into());
        self
    }

    /// OpenAI-compatible image endpoint registered as `cipher`.
    pub fn cipher(mut self, api_key: impl Into<String>) -> Self {
        self.cipher_key = Some(api_key.into());
        self
    }

    pub fn cipher_url(mut self, url: impl Into<String>) -> Self {
        self.cipher_url = Some(url.into());
        self
    }

    /// Replicate: `stable-diffusion` images and `replicate` video.
    pub fn replicate(mut self, api_key: impl Into<String>) -> Self {
        self.replicate_key = Some(api_key.into());
        self
    }

    pub fn replicate_base_url(mut self, url: impl Into<String>) -> Self {
        self.replicate_base_url = Some(url.into());
        self
    }

    /// Anthropic diagrams (`anthropic`).
    pub fn anthropic(mut self, api_key: impl Into<String>) -> Self {
        self.anthropic_key = Some(api_key.into());
        self
    }

    pub fn anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_base_url = Some(url.into());
        self
    }

    pub fn anthropic_model(mut self, model: impl Into<String>) -> Self {
        self.anthropic_model = Some(model.into());
        self
    }

    pub fn image_provider(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.images.push(provider);
        self
    }

    pub fn diagram_provider(mut self, provider: Arc<dyn DiagramProvider>) -> Self {
        self.diagrams.push(provider);
        self
    }

    pub fn video_provider(mut self, provider: Arc<dyn VideoProvider>) -> Self {
        self.videos.push(provider);
        self
    }

    /// Load policies and construct the gateway.
    pub fn build(self) -> Result<Gateway> {
        let source = self
            .policy_source
            .clone()
            .unwrap_or_else(|| Arc::new(StaticPolicySource::new()));
        let store = PolicyStore::load_all(source);

        let mut registry = ProviderRegistry::new();
        self.register_openai(&mut registry)?;
        self.register_anthropic(&mut registry)?;
        self.register_replicate(&mut registry)?;

        for provider in self.images {
            registry.add_image(provider);
        }
        for provider in self.diagrams {
            registry.add_diagram(provider);
        }
        for provider in self.videos {
            registry.add_video(provider);
        }

        if registry.is_empty() {
            warn!("no providers configured; every generation request will fail");
        }
        info!(providers = ?registry, "gateway built");
        Ok(Gateway::new(store, registry))
    }

    #[cfg(feature = "openai")]
    fn register_openai(&self, registry: &mut ProviderRegistry) -> Result<()> {
        use crate::providers::openai::{
            DEFAULT_CIPHER_URL, DEFAULT_OPENAI_BASE_URL, OpenAiDiagramClient, OpenAiImageClient,
        };

        if let Some(key) = &self.openai_key {
            let base = self
                .openai_base_url
                .as_deref()
                .unwrap_or(DEFAULT_OPENAI_BASE_URL);
            let mut images = OpenAiImageClient::with_base_url(key, base)?;
            if let Some(model) = &self.openai_image_model {
                images = images.model(model);
            }
            let mut diagrams = OpenAiDiagramClient::with_base_url(key, base)?;
            if let Some(model) = &self.openai_chat_model {
                diagrams = diagrams.model(model);
            }
            registry.add_image(Arc::new(images));
            registry.add_diagram(Arc::new(diagrams));
        }
        if let Some(key) = &self.cipher_key {
            let url = self.cipher_url.as_deref().unwrap_or(DEFAULT_CIPHER_URL);
            registry.add_image(Arc::new(OpenAiImageClient::cipher(key, url)?));
        }
        Ok(())
    }

    #[cfg(not(feature = "openai"))]
    fn register_openai(&self, _registry: &mut ProviderRegistry) -> Result<()> {
        if self.openai_key.is_some() || self.cipher_key.is_some() {
            warn!("openai/cipher keys ignored: built without the `openai` feature");
        }
        Ok(())
    }

    #[cfg(feature = "anthropic")]
    fn register_anthropic(&self, registry: &mut ProviderRegistry) -> Result<()> {
        use crate::providers::anthropic::{AnthropicDiagramClient, DEFAULT_ANTHROPIC_BASE_URL};

        if let Some(key) = &self.anthropic_key {
            let base = self
                .anthropic_base_url
                .as_deref()
                .unwrap_or(DEFAULT_ANTHROPIC_BASE_URL);
            let mut client = AnthropicDiagramClient::with_base_url(key, base)?;
            if let Some(model) = &self.anthropic_model {
                client = client.model(model);
            }
            registry.add_diagram(Arc::new(client));
        }
        Ok(())
    }

    #[cfg(not(feature = "anthropic"))]
    fn register_anthropic(&self, _registry: &mut ProviderRegistry) -> Result<()> {
        if self.anthropic_key.is_some() {
            warn!("anthropic key ignored: built without the `anthropic` feature");
        }
        Ok(())
    }

    #[cfg(feature = "replicate")]
    fn register_replicate(&self, registry: &mut ProviderRegistry) -> Result<()> {
        use crate::providers::ReplicateClient;

        if let Some(key) = &self.replicate_key {
            let mut images = ReplicateClient::stable_diffusion(key)?;
            let mut video = ReplicateClient::video(key)?;
            if let Some(base) = &self.replicate_base_url {
                images = images.base_url(base);
                video = video.base_url(base);
            }
            registry.add_image(Arc::new(images));
            registry.add_video(Arc::new(video));
        }
        Ok(())
    }

    #[cfg(not(feature = "replicate"))]
    fn register_replicate(&self, _registry: &mut ProviderRegistry) -> Result<()> {
        if self.replicate_key.is_some() {
            warn!("replicate key ignored: built without the `replicate` feature");
        }
        Ok(())
    }
}
