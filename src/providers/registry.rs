//! Provider lookup by routing name.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::traits::{DiagramProvider, ImageProvider, VideoProvider};
use crate::types::GenerationKind;
use crate::{AtelierError, Result};

/// Registered providers per generation kind, keyed by [`name()`].
///
/// Names are matched case-insensitively. Registering a second provider
/// under the same name replaces the first.
///
/// [`name()`]: ImageProvider::name
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    images: BTreeMap<String, Arc<dyn ImageProvider>>,
    diagrams: BTreeMap<String, Arc<dyn DiagramProvider>>,
    videos: BTreeMap<String, Arc<dyn VideoProvider>>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn missing(kind: GenerationKind, name: &str) -> AtelierError {
    AtelierError::NoProvider(format!("no {kind} provider registered as '{name}'"))
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&mut self, provider: Arc<dyn ImageProvider>) {
        self.images.insert(key(provider.name()), provider);
    }

    pub fn add_diagram(&mut self, provider: Arc<dyn DiagramProvider>) {
        self.diagrams.insert(key(provider.name()), provider);
    }

    pub fn add_video(&mut self, provider: Arc<dyn VideoProvider>) {
        self.videos.insert(key(provider.name()), provider);
    }

    pub fn image(&self, name: &str) -> Result<Arc<dyn ImageProvider>> {
        self.images
            .get(&key(name))
            .cloned()
            .ok_or_else(|| missing(GenerationKind::Image, name))
    }

    pub fn diagram(&self, name: &str) -> Result<Arc<dyn DiagramProvider>> {
        self.diagrams
            .get(&key(name))
            .cloned()
            .ok_or_else(|| missing(GenerationKind::Diagram, name))
    }

    pub fn video(&self, name: &str) -> Result<Arc<dyn VideoProvider>> {
        self.videos
            .get(&key(name))
            .cloned()
            .ok_or_else(|| missing(GenerationKind::Video, name))
    }

    pub fn contains(&self, kind: GenerationKind, name: &str) -> bool {
        let name = key(name);
        match kind {
            GenerationKind::Image => self.images.contains_key(&name),
            GenerationKind::Diagram => self.diagrams.contains_key(&name),
            GenerationKind::Video => self.videos.contains_key(&name),
        }
    }

    /// Registered names for `kind`, sorted.
    pub fn names(&self, kind: GenerationKind) -> Vec<String> {
        match kind {
            GenerationKind::Image => self.images.keys().cloned().collect(),
            GenerationKind::Diagram => self.diagrams.keys().cloned().collect(),
            GenerationKind::Video => self.videos.keys().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.diagrams.is_empty() && self.videos.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("images", &self.images.keys().collect::<Vec<_>>())
            .field("diagrams", &self.diagrams.keys().collect::<Vec<_>>())
            .field("videos", &self.videos.keys().collect::<Vec<_>>())
            .finish()
    }
}
