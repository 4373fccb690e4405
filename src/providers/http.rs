//! Shared HTTP plumbing for the reference adapters.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::{AtelierError, Result};

/// Transport-level ceiling. Per-attempt deadlines from the resilience
/// policy are normally shorter and fire first.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .build()
        .map_err(|e| AtelierError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Pass successful responses through; turn anything else into
/// [`AtelierError::Provider`] carrying the status and a trimmed body.
pub(crate) async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status.to_string();
    }
    Err(AtelierError::Provider {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        message,
    })
}

/// Remove a surrounding Markdown code fence, if any.
pub(crate) fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_is_stripped() {
        let code = strip_code_fence("```mermaid\ngraph TD\n  A --> B\n```\n");
        assert_eq!(code, "graph TD\n  A --> B");
    }

    #[test]
    fn unfenced_code_is_trimmed() {
        assert_eq!(strip_code_fence("  digraph { a -> b }\n"), "digraph { a -> b }");
    }
}
