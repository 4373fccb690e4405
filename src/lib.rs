//! Atelier - policy-enforcing gateway for AI generation APIs
//!
//! This crate sits between clients and image, diagram and video generation
//! providers. Every request passes through the same stages: content
//! screening, response caching, budget enforcement, provider routing with
//! fallback chains, circuit breaking, retry with backoff and per-attempt
//! deadlines. The behavior of each stage is governed by hot-reloadable YAML
//! policy documents.
//!
//! # Example
//!
//! ```rust,no_run
//! use atelier::{Atelier, ImageRequest};
//!
//! #[tokio::main]
//! async fn main() -> atelier::Result<()> {
//!     let gateway = Atelier::builder()
//!         .policies_dir("policies")
//!         .openai("sk-your-key")
//!         .replicate("r8-your-key")
//!         .build()?;
//!
//!     let response = gateway
//!         .generate_image(ImageRequest::new("a blue cube").size("1024x1024"))
//!         .await?;
//!
//!     println!("served by {}", response.provider);
//!     println!("spent today: ${}", gateway.budget_status().daily_spent_usd);
//!     Ok(())
//! }
//! ```
//!
//! # Custom providers
//!
//! Implement [`ImageProvider`], [`DiagramProvider`] or [`VideoProvider`]
//! and register the implementation with the builder. A custom provider
//! registered under a built-in name replaces the built-in client.

pub mod budget;
pub mod cache;
pub mod error;
pub mod features;
pub mod gateway;
pub mod health;
pub mod policy;
pub mod providers;
pub mod resilience;
pub mod router;
pub mod screening;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use error::{AtelierError, Result};
pub use gateway::{Atelier, AtelierBuilder, Gateway, ProviderListing};
pub use health::{HealthReport, HealthStatus};
pub use policy::{FilePolicySource, PolicyDomain, PolicySource, ReloadOutcome, StaticPolicySource};
pub use providers::{DiagramProvider, ImageProvider, VideoProvider};
pub use router::CostMode;
pub use version::{PKG_VERSION, version_string};

pub use types::{
    DiagramRequest, DiagramResponse, DiagramType, Endpoint, GenerationKind, ImageData,
    ImageRequest, ImageResponse, ImageStyle, OutputFormat, VideoRequest, VideoResponse,
};
