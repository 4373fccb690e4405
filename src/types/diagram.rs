use serde::{Deserialize, Serialize};

use crate::router::CostMode;

/// Diagram source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramType {
    #[default]
    Mermaid,
    Graphviz,
}

impl DiagramType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagramType::Mermaid => "mermaid",
            DiagramType::Graphviz => "graphviz",
        }
    }
}

/// Rendered output format requested from the rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Svg,
    Pdf,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
        }
    }
}

fn default_kind() -> String {
    "flowchart".to_string()
}

fn default_ai_provider() -> String {
    "openai".to_string()
}

/// Diagram generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramRequest {
    pub description: String,
    #[serde(default)]
    pub diagram_type: DiagramType,
    /// Flowchart, sequence, er, ...
    #[serde(default = "default_kind")]
    pub diagram_kind: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Provider writing the diagram source.
    #[serde(default = "default_ai_provider")]
    pub ai_provider: String,
    #[serde(default)]
    pub cost_mode: CostMode,
}

impl DiagramRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            diagram_type: DiagramType::default(),
            diagram_kind: default_kind(),
            output_format: OutputFormat::default(),
            ai_provider: default_ai_provider(),
            cost_mode: CostMode::default(),
        }
    }
}

/// Diagram generation response.
///
/// `b64_json` holds the rendered diagram when a rendering backend is
/// attached; `code` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramResponse {
    #[serde(default)]
    pub b64_json: Option<String>,
    pub code: String,
    pub format: String,
    pub diagram_type: String,
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req: DiagramRequest =
            serde_json::from_str(r#"{"description": "login flow"}"#).unwrap();
        assert_eq!(req.diagram_type, DiagramType::Mermaid);
        assert_eq!(req.diagram_kind, "flowchart");
        assert_eq!(req.output_format, OutputFormat::Png);
        assert_eq!(req.ai_provider, "openai");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let res: Result<DiagramRequest, _> =
            serde_json::from_str(r#"{"description": "x", "output_format": "gif"}"#);
        assert!(res.is_err());
    }
}
