//! Generation providers.
//!
//! Capability traits live in [`traits`]; [`ProviderRegistry`] maps routing
//! names to implementations. The HTTP adapters are reference clients for
//! the upstream APIs and are each behind a cargo feature.

pub mod registry;
pub mod traits;

#[cfg(any(feature = "openai", feature = "anthropic", feature = "replicate"))]
mod http;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(any(feature = "openai", feature = "anthropic"))]
pub mod openai;
#[cfg(feature = "replicate")]
pub mod replicate;

pub use registry::ProviderRegistry;
pub use traits::{
    DiagramOutput, DiagramProvider, ImageJob, ImageProvider, VideoOutput, VideoProvider,
};

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicDiagramClient;
#[cfg(any(feature = "openai", feature = "anthropic"))]
pub use openai::{OpenAiDiagramClient, OpenAiImageClient};
#[cfg(feature = "replicate")]
pub use replicate::ReplicateClient;
