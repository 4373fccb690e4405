//! Replicate predictions API: Stable Diffusion images and Stable Video
//! Diffusion clips.
//!
//! A prediction is created, then polled until it reaches a terminal
//! status. The per-attempt deadline applied by the gateway bounds the
//! whole create-and-poll sequence; `max_polls` is a backstop for direct
//! use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::http::{build_client, check_status};
use super::traits::{ImageJob, ImageProvider, VideoOutput, VideoProvider};
use crate::types::{ImageData, VideoRequest};
use crate::{AtelierError, Result};

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com";

pub const DEFAULT_IMAGE_MODEL: &str =
    "stability-ai/sdxl:39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";
pub const DEFAULT_VIDEO_MODEL: &str = "stability-ai/stable-video-diffusion:3f0457e4619daac51203dedb472816fd4af51f3149fa7a9e0b5ffcf1b8172438";

const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, watermark, text";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_POLLS: u32 = 600;

#[derive(Clone)]
pub struct ReplicateClient {
    name: String,
    api_key: String,
    http: Client,
    base_url: String,
    model: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReplicateClient {
    /// SDXL image generation, registered as `stable-diffusion`.
    pub fn stable_diffusion(api_key: impl Into<String>) -> Result<Self> {
        Self::build("stable-diffusion", api_key.into(), DEFAULT_IMAGE_MODEL)
    }

    /// Stable Video Diffusion, registered as `replicate`.
    pub fn video(api_key: impl Into<String>) -> Result<Self> {
        Self::build("replicate", api_key.into(), DEFAULT_VIDEO_MODEL)
    }

    fn build(name: &str, api_key: String, model: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            api_key,
            http: build_client()?,
            base_url: DEFAULT_REPLICATE_BASE_URL.into(),
            model: model.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    /// Point at a different base URL (for testing with wiremock).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `owner/name` or `owner/name:version`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls.max(1);
        self
    }

    /// Run a prediction to completion and return its `output`.
    async fn predict(&self, input: Value) -> Result<Value> {
        let request = match self.model.split_once(':') {
            Some((_, version)) => self
                .http
                .post(format!("{}/v1/predictions", self.base_url))
                .json(&json!({ "version": version, "input": input })),
            None => self
                .http
                .post(format!("{}/v1/models/{}/predictions", self.base_url, self.model))
                .json(&json!({ "input": input })),
        };
        let response = request.bearer_auth(&self.api_key).send().await?;
        let mut prediction: Prediction = check_status(&self.name, response).await?.json().await?;

        let mut polls = 0;
        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    return prediction.output.ok_or(AtelierError::EmptyResponse);
                }
                "failed" | "canceled" => {
                    let message = prediction
                        .error
                        .map(|e| match e {
                            Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| format!("prediction {}", prediction.status));
                    return Err(AtelierError::Provider {
                        provider: self.name.clone(),
                        status: None,
                        message,
                    });
                }
                _ => {}
            }
            if polls >= self.max_polls {
                return Err(AtelierError::Provider {
                    provider: self.name.clone(),
                    status: None,
                    message: format!("prediction {} did not finish", prediction.id),
                });
            }
            polls += 1;
            debug!(provider = %self.name, id = %prediction.id, status = %prediction.status, "polling prediction");
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http
                .get(format!("{}/v1/predictions/{}", self.base_url, prediction.id))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            prediction = check_status(&self.name, response).await?.json().await?;
        }
    }
}

#[derive(Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Output is either a single URL or a list of them.
fn output_urls(output: Value) -> Vec<String> {
    match output {
        Value::String(url) => vec![url],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// `"1024x768"` → `(1024, 768)`; anything else → 1024 square.
fn dimensions(size: Option<&str>) -> (u32, u32) {
    size.and_then(|s| s.split_once('x'))
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
        .unwrap_or((1024, 1024))
}

#[derive(Serialize)]
struct ImageInput<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    num_outputs: u32,
    guidance_scale: f32,
    num_inference_steps: u32,
}

#[async_trait]
impl ImageProvider for ReplicateClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_images(&self, job: &ImageJob) -> Result<Vec<ImageData>> {
        let (width, height) = dimensions(job.size.as_deref());
        let input = serde_json::to_value(ImageInput {
            prompt: &job.prompt,
            negative_prompt: NEGATIVE_PROMPT,
            width,
            height,
            num_outputs: job.n.max(1),
            guidance_scale: 7.5,
            num_inference_steps: 50,
        })?;
        let urls = output_urls(self.predict(input).await?);
        if urls.is_empty() {
            return Err(AtelierError::EmptyResponse);
        }
        Ok(urls.into_iter().map(ImageData::url).collect())
    }
}

#[async_trait]
impl VideoProvider for ReplicateClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_video(&self, request: &VideoRequest) -> Result<VideoOutput> {
        let image = match (&request.image_url, &request.image_b64) {
            (Some(url), _) if !url.is_empty() => url.clone(),
            (_, Some(b64)) if !b64.is_empty() => format!("data:image/png;base64,{b64}"),
            _ => {
                return Err(AtelierError::InvalidInput(
                    "Either image_url or image_b64 must be provided".into(),
                ));
            }
        };
        let input = json!({
            "image": image,
            "motion_bucket_id": request.motion_bucket_id,
            "cond_aug": 0.02,
            "num_frames": request.num_frames,
            "num_inference_steps": 25,
        });
        let video_url = output_urls(self.predict(input).await?)
            .into_iter()
            .next()
            .ok_or(AtelierError::EmptyResponse)?;
        Ok(VideoOutput {
            video_url: Some(video_url),
            video_b64: None,
            format: "mp4".into(),
        })
    }
}
