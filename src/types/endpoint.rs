//! Logical endpoints and the generation kinds they belong to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Family of generation requests. Each kind has its own route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Image,
    Diagram,
    Video,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 3] = [
        GenerationKind::Image,
        GenerationKind::Diagram,
        GenerationKind::Video,
    ];

    /// Plural form used in URLs and route tables (`images`, ...).
    pub fn plural(self) -> &'static str {
        match self {
            GenerationKind::Image => "images",
            GenerationKind::Diagram => "diagrams",
            GenerationKind::Video => "videos",
        }
    }

    pub fn from_plural(s: &str) -> Option<Self> {
        GenerationKind::ALL.into_iter().find(|k| k.plural() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Diagram => "diagram",
            GenerationKind::Video => "video",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation endpoints. Policies key per-endpoint overrides on [`Endpoint::path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ImageGenerate,
    ImageThumbnail,
    DiagramGenerate,
    VideoGenerate,
    VideoAnimate,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::ImageGenerate => "/v1/images/generate",
            Endpoint::ImageThumbnail => "/v1/images/generate/thumbnail",
            Endpoint::DiagramGenerate => "/v1/diagrams/generate",
            Endpoint::VideoGenerate => "/v1/videos/generate",
            Endpoint::VideoAnimate => "/v1/videos/animate",
        }
    }

    pub fn kind(self) -> GenerationKind {
        match self {
            Endpoint::ImageGenerate | Endpoint::ImageThumbnail => GenerationKind::Image,
            Endpoint::DiagramGenerate => GenerationKind::Diagram,
            Endpoint::VideoGenerate | Endpoint::VideoAnimate => GenerationKind::Video,
        }
    }

    /// Feature flag gating this endpoint (`endpoints.<name>`).
    pub fn flag_name(self) -> &'static str {
        match self {
            Endpoint::ImageGenerate | Endpoint::ImageThumbnail => "image_generation",
            Endpoint::DiagramGenerate => "diagram_generation",
            Endpoint::VideoGenerate => "video_generation",
            Endpoint::VideoAnimate => "image_animation",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_shares_image_kind_and_flag() {
        assert_eq!(Endpoint::ImageThumbnail.kind(), GenerationKind::Image);
        assert_eq!(Endpoint::ImageThumbnail.flag_name(), "image_generation");
    }

    #[test]
    fn animate_has_its_own_flag() {
        assert_eq!(Endpoint::VideoAnimate.kind(), GenerationKind::Video);
        assert_eq!(Endpoint::VideoAnimate.flag_name(), "image_animation");
    }

    #[test]
    fn plural_round_trip() {
        assert_eq!(GenerationKind::from_plural("videos"), Some(GenerationKind::Video));
        assert_eq!(GenerationKind::from_plural("audio"), None);
    }
}
