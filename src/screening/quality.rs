//! Quality policy: length limits, toxicity, format validation and
//! endpoint-specific structural checks.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::policy::{Policy, PolicyDomain};
use crate::types::{Endpoint, GenerationKind};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LengthOverride {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Prompt length bounds, in characters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LengthLimitsConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub max_length: usize,
    /// Keyed by endpoint path.
    pub per_endpoint: HashMap<String, LengthOverride>,
}

impl Default for LengthLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 0,
            max_length: 100_000,
            per_endpoint: HashMap::new(),
        }
    }
}

impl LengthLimitsConfig {
    pub(crate) fn violation(&self, endpoint: &str, text: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let o = self.per_endpoint.get(endpoint).copied().unwrap_or_default();
        let min = o.min_length.unwrap_or(self.min_length);
        let max = o.max_length.unwrap_or(self.max_length);
        let len = text.chars().count();
        if len < min {
            warn!(endpoint, length = len, min, "length limit violation");
            return Some(format!("Content length {len} is below minimum {min}"));
        }
        if len > max {
            warn!(endpoint, length = len, max, "length limit violation");
            return Some(format!("Content length {len} exceeds maximum {max}"));
        }
        None
    }
}

/// Keyword-ratio toxicity scoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToxicityConfig {
    pub enabled: bool,
    pub threshold: f64,
    /// Reject when over threshold; otherwise only warn.
    pub block_on_toxicity: bool,
    pub keywords: Vec<String>,
}

impl Default for ToxicityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.7,
            block_on_toxicity: true,
            keywords: [
                "hate",
                "violence",
                "harassment",
                "abuse",
                "discrimination",
                "offensive",
                "inappropriate",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Outcome of the toxicity stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ToxicityVerdict {
    Clean,
    Warn(String),
    Block(String),
}

impl ToxicityConfig {
    pub fn score(&self, text: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let lower = text.to_lowercase();
        let hits = self
            .keywords
            .iter()
            .filter(|k| lower.contains(&k.to_lowercase()))
            .count();
        (hits as f64 / self.keywords.len() as f64).min(1.0)
    }

    pub fn verdict(&self, text: &str) -> ToxicityVerdict {
        if !self.enabled {
            return ToxicityVerdict::Clean;
        }
        let score = self.score(text);
        if score < self.threshold {
            return ToxicityVerdict::Clean;
        }
        let message = format!("Potential toxicity detected (score: {score:.2})");
        let preview: String = text.chars().take(50).collect();
        warn!(score, text_preview = %preview, "toxicity detected");
        if self.block_on_toxicity {
            ToxicityVerdict::Block(message)
        } else {
            ToxicityVerdict::Warn(message)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatValidationConfig {
    pub enabled: bool,
    pub required_fields: Vec<String>,
    /// Endpoint path → required fields, replacing the global list.
    pub per_endpoint: HashMap<String, Vec<String>>,
    /// Require the response to be a JSON object.
    pub strict_validation: bool,
}

impl Default for FormatValidationConfig {
    fn default() -> Self {
        let fields =
            |names: &[&str]| -> Vec<String> { names.iter().map(|s| s.to_string()).collect() };
        Self {
            enabled: true,
            required_fields: fields(&["data", "provider"]),
            per_endpoint: HashMap::from([
                (
                    Endpoint::DiagramGenerate.path().to_string(),
                    fields(&["code", "provider"]),
                ),
                (Endpoint::VideoGenerate.path().to_string(), fields(&["provider"])),
                (Endpoint::VideoAnimate.path().to_string(), fields(&["provider"])),
            ]),
            strict_validation: false,
        }
    }
}

impl FormatValidationConfig {
    pub fn required_for(&self, endpoint: &str) -> &[String] {
        self.per_endpoint
            .get(endpoint)
            .unwrap_or(&self.required_fields)
    }

    pub(crate) fn violation(&self, endpoint: &str, response: &Value) -> Option<String> {
        if !self.enabled {
            return None;
        }
        match response {
            Value::Object(map) => {
                let missing = self
                    .required_for(endpoint)
                    .iter()
                    .find(|f| !map.contains_key(f.as_str()))?;
                warn!(endpoint, missing_field = %missing, "format validation failed");
                Some(format!("Missing required field: {missing}"))
            }
            _ if self.strict_validation => {
                warn!(endpoint, "format validation failed: response is not an object");
                Some("Response must be a dictionary".into())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityChecksConfig {
    pub enabled: bool,
    pub check_image_quality: bool,
}

impl Default for QualityChecksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_image_quality: true,
        }
    }
}

fn non_empty(v: Option<&Value>) -> bool {
    match v {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

impl QualityChecksConfig {
    pub(crate) fn violation(&self, endpoint: Endpoint, response: &Value) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let obj = response.as_object()?;
        let reason = match endpoint.kind() {
            GenerationKind::Image => match obj.get("data") {
                Some(Value::Array(items)) if items.is_empty() => Some("No images generated"),
                Some(Value::Array(items)) if self.check_image_quality => items
                    .iter()
                    .filter_map(Value::as_object)
                    .any(|item| !non_empty(item.get("url")) && !non_empty(item.get("b64_json")))
                    .then_some("Image data missing URL or base64 content"),
                _ => None,
            },
            GenerationKind::Diagram => {
                (!non_empty(obj.get("code"))).then_some("No diagram code generated")
            }
            GenerationKind::Video => (!non_empty(obj.get("video_url"))
                && !non_empty(obj.get("video_b64")))
            .then_some("No video generated"),
        };
        if let Some(reason) = reason {
            warn!(endpoint = %endpoint, reason, "quality check failed");
        }
        reason.map(String::from)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    pub length_limits: LengthLimitsConfig,
    pub format_validation: FormatValidationConfig,
    pub quality_checks: QualityChecksConfig,
    pub toxicity: ToxicityConfig,
}

impl Policy for QualityPolicy {
    const DOMAIN: PolicyDomain = PolicyDomain::Quality;

    fn prepare(&mut self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.toxicity.threshold) {
            return Err("toxicity.threshold must be within [0, 1]".into());
        }
        if self.length_limits.min_length > self.length_limits.max_length {
            return Err("length_limits.min_length exceeds max_length".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn length_override_beats_global() {
        let mut q = QualityPolicy::default();
        q.length_limits.per_endpoint.insert(
            "/v1/images/generate".into(),
            LengthOverride {
                min_length: Some(5),
                max_length: None,
            },
        );
        assert_eq!(
            q.length_limits.violation("/v1/images/generate", "cube").unwrap(),
            "Content length 4 is below minimum 5"
        );
        assert!(q.length_limits.violation("/v1/videos/generate", "cube").is_none());
    }

    #[test]
    fn toxicity_warns_or_blocks_by_policy() {
        let mut t = ToxicityConfig {
            keywords: vec!["hate".into(), "abuse".into()],
            threshold: 0.5,
            ..ToxicityConfig::default()
        };
        assert_eq!(t.verdict("a calm lake"), ToxicityVerdict::Clean);
        assert!(matches!(t.verdict("HATE speech"), ToxicityVerdict::Block(_)));
        t.block_on_toxicity = false;
        assert_eq!(
            t.verdict("hate and abuse"),
            ToxicityVerdict::Warn("Potential toxicity detected (score: 1.00)".into())
        );
    }

    #[test]
    fn single_default_keyword_stays_under_threshold() {
        let t = ToxicityConfig::default();
        assert_eq!(t.verdict("a scene of violence"), ToxicityVerdict::Clean);
    }

    #[test]
    fn format_uses_per_endpoint_fields() {
        let f = FormatValidationConfig::default();
        let diagram = json!({"code": "graph TD", "provider": "openai"});
        assert!(f.violation("/v1/diagrams/generate", &diagram).is_none());
        assert_eq!(
            f.violation("/v1/images/generate", &diagram).unwrap(),
            "Missing required field: data"
        );
    }

    #[test]
    fn strict_format_requires_object() {
        let mut f = FormatValidationConfig::default();
        assert!(f.violation("/v1/images/generate", &json!([1])).is_none());
        f.strict_validation = true;
        assert_eq!(
            f.violation("/v1/images/generate", &json!([1])).unwrap(),
            "Response must be a dictionary"
        );
    }

    #[test]
    fn image_quality_checks() {
        let q = QualityChecksConfig::default();
        let ep = Endpoint::ImageGenerate;
        assert_eq!(
            q.violation(ep, &json!({"data": []})).unwrap(),
            "No images generated"
        );
        assert_eq!(
            q.violation(ep, &json!({"data": [{"url": null, "b64_json": null}]}))
                .unwrap(),
            "Image data missing URL or base64 content"
        );
        assert!(q.violation(ep, &json!({"data": [{"b64_json": "aGk="}]})).is_none());
    }

    #[test]
    fn video_and_diagram_quality_checks() {
        let q = QualityChecksConfig::default();
        assert_eq!(
            q.violation(Endpoint::VideoAnimate, &json!({"provider": "replicate"}))
                .unwrap(),
            "No video generated"
        );
        assert_eq!(
            q.violation(Endpoint::DiagramGenerate, &json!({"code": ""})).unwrap(),
            "No diagram code generated"
        );
    }
}
