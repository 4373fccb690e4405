use serde::{Deserialize, Serialize};

use crate::router::CostMode;
use crate::{AtelierError, Result};

fn default_motion() -> u16 {
    127
}

fn default_frames() -> u32 {
    25
}

fn default_video_provider() -> String {
    "replicate".to_string()
}

/// Image-to-video request. One of `image_url` / `image_b64` is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRequest {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_b64: Option<String>,
    /// Motion intensity, 1-255.
    #[serde(default = "default_motion")]
    pub motion_bucket_id: u16,
    /// Frame count, 14-25.
    #[serde(default = "default_frames")]
    pub num_frames: u32,
    #[serde(default = "default_video_provider")]
    pub provider: String,
    #[serde(default)]
    pub cost_mode: CostMode,
}

impl VideoRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            image_b64: None,
            motion_bucket_id: default_motion(),
            num_frames: default_frames(),
            provider: default_video_provider(),
            cost_mode: CostMode::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if !present(&self.image_url) && !present(&self.image_b64) {
            return Err(AtelierError::InvalidInput(
                "Either image_url or image_b64 must be provided".into(),
            ));
        }
        if !(1..=255).contains(&self.motion_bucket_id) {
            return Err(AtelierError::InvalidInput(format!(
                "motion_bucket_id must be between 1 and 255, got {}",
                self.motion_bucket_id
            )));
        }
        if !(14..=25).contains(&self.num_frames) {
            return Err(AtelierError::InvalidInput(format!(
                "num_frames must be between 14 and 25, got {}",
                self.num_frames
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoResponse {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_b64: Option<String>,
    pub format: String,
    pub provider: String,
}
