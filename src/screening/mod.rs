//! Content pipeline: ordered, short-circuiting checks around a provider
//! call.
//!
//! Prompt stages, in order: length limits, content filter, prompt
//! injection, PII masking, toxicity. Response stages, in order: format
//! validation, quality checks, sanitization. A rejecting stage stops the
//! pipeline and names itself in the error; a disabled stage passes.

mod quality;
mod security;

pub use quality::{
    FormatValidationConfig, LengthLimitsConfig, LengthOverride, QualityChecksConfig,
    QualityPolicy, ToxicityConfig, ToxicityVerdict,
};
pub use security::{
    ContentFilterConfig, PiiDetectionConfig, PromptInjectionConfig, SanitizationConfig,
    SecurityPolicy,
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::policy::PolicyCell;
use crate::telemetry;
use crate::types::Endpoint;
use crate::{AtelierError, Result};

pub mod stage {
    pub const LENGTH_LIMITS: &str = "length_limits";
    pub const CONTENT_FILTER: &str = "content_filter";
    pub const PROMPT_INJECTION: &str = "prompt_injection";
    pub const TOXICITY: &str = "toxicity";
    pub const FORMAT_VALIDATION: &str = "format_validation";
    pub const QUALITY_CHECKS: &str = "quality_checks";
}

/// A prompt that passed every pre-call stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenedPrompt {
    /// Prompt with PII replaced by the mask.
    pub text: String,
    pub pii_masked: bool,
    /// Set when toxicity crossed the threshold but blocking is off.
    pub toxicity_warning: Option<String>,
}

#[derive(Clone)]
pub struct ContentPipeline {
    security: PolicyCell<SecurityPolicy>,
    quality: PolicyCell<QualityPolicy>,
}

fn reject_prompt(stage: &'static str, reason: String) -> AtelierError {
    metrics::counter!(telemetry::PIPELINE_REJECTIONS_TOTAL, "stage" => stage).increment(1);
    AtelierError::PolicyViolation { stage, reason }
}

fn reject_response(stage: &'static str, reason: String) -> AtelierError {
    metrics::counter!(telemetry::PIPELINE_REJECTIONS_TOTAL, "stage" => stage).increment(1);
    AtelierError::QualityCheck { stage, reason }
}

impl ContentPipeline {
    pub fn new(security: PolicyCell<SecurityPolicy>, quality: PolicyCell<QualityPolicy>) -> Self {
        Self { security, quality }
    }

    /// Run the prompt stages.
    pub fn screen_prompt(&self, endpoint: Endpoint, prompt: &str) -> Result<ScreenedPrompt> {
        let security = self.security.load();
        let quality = self.quality.load();

        if let Some(reason) = quality.length_limits.violation(endpoint.path(), prompt) {
            return Err(reject_prompt(stage::LENGTH_LIMITS, reason));
        }
        if let Some(reason) = security.content_filter.violation(prompt) {
            return Err(reject_prompt(stage::CONTENT_FILTER, reason));
        }
        if let Some(reason) = security.prompt_injection.violation(prompt) {
            return Err(reject_prompt(stage::PROMPT_INJECTION, reason));
        }

        let (text, pii_masked) = security.pii_detection.mask(prompt);

        let toxicity_warning = match quality.toxicity.verdict(&text) {
            ToxicityVerdict::Clean => None,
            ToxicityVerdict::Warn(message) => Some(message),
            ToxicityVerdict::Block(reason) => {
                return Err(reject_prompt(stage::TOXICITY, reason));
            }
        };

        debug!(endpoint = %endpoint, pii_masked, "prompt screened");
        Ok(ScreenedPrompt {
            text,
            pii_masked,
            toxicity_warning,
        })
    }

    /// Run the response stages, returning the sanitized response.
    pub fn screen_response(&self, endpoint: Endpoint, response: Value) -> Result<Value> {
        let security = self.security.load();
        let quality = self.quality.load();

        if let Some(reason) = quality.format_validation.violation(endpoint.path(), &response) {
            return Err(reject_response(stage::FORMAT_VALIDATION, reason));
        }
        if let Some(reason) = quality.quality_checks.violation(endpoint, &response) {
            return Err(reject_response(stage::QUALITY_CHECKS, reason));
        }
        Ok(security.sanitization.sanitize(response))
    }
}

impl Default for ContentPipeline {
    fn default() -> Self {
        Self::new(PolicyCell::default(), PolicyCell::default())
    }
}

impl std::fmt::Debug for ContentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let security = self.security.load();
        let quality = self.quality.load();
        f.debug_struct("ContentPipeline")
            .field("security_version", &security.version)
            .field("quality_version", &quality.version)
            .finish()
    }
}

/// Log a toxicity warning that did not block.
pub(crate) fn note_warning(endpoint: Endpoint, screened: &ScreenedPrompt) {
    if let Some(w) = &screened.toxicity_warning {
        warn!(endpoint = %endpoint, warning = %w, "prompt passed with toxicity warning");
    }
}
