//! Capability traits for generation providers.
//!
//! Each generation kind has its own trait rather than one "god trait", so
//! a backend registers only for what it can do. Providers receive input
//! that already passed screening and return raw result items; retry,
//! deadlines, circuit breaking and fallback are applied around them by
//! the gateway.

use async_trait::async_trait;

use crate::Result;
use crate::types::{DiagramRequest, ImageData, VideoRequest};

// ============================================================================
// Image Provider
// ============================================================================

/// A screened, style-enhanced image request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub prompt: String,
    pub size: Option<String>,
    pub n: u32,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name, as used in routing tables.
    fn name(&self) -> &str;

    async fn generate_images(&self, job: &ImageJob) -> Result<Vec<ImageData>>;
}

// ============================================================================
// Diagram Provider
// ============================================================================

/// Diagram source produced by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramOutput {
    pub code: String,
    /// Rendered image, when the provider renders.
    pub b64_json: Option<String>,
}

#[async_trait]
pub trait DiagramProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `description` is the screened form of `request.description`.
    async fn generate_diagram(
        &self,
        request: &DiagramRequest,
        description: &str,
    ) -> Result<DiagramOutput>;
}

// ============================================================================
// Video Provider
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VideoOutput {
    pub video_url: Option<String>,
    pub video_b64: Option<String>,
    pub format: String,
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_video(&self, request: &VideoRequest) -> Result<VideoOutput>;
}
