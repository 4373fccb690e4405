//! Request and response types for the generation endpoints.

mod diagram;
mod endpoint;
mod image;
mod video;

pub use diagram::{DiagramRequest, DiagramResponse, DiagramType, OutputFormat};
pub use endpoint::{Endpoint, GenerationKind};
pub use image::{ImageData, ImageRequest, ImageResponse, ImageStyle};
pub use video::{VideoRequest, VideoResponse};
