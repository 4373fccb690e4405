//! Configuration loading for atelierd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.atelier/config.toml` (user)
//! 3. `/etc/atelier/config.toml` (system)
//!
//! With no file at (2) or (3) the built-in defaults apply.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.atelier/secrets.toml` (user, must be 0600)
//! 2. `/etc/atelier/secrets.toml` (system, must be 0600)

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{AtelierBuilder, AtelierError, Result};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8000).
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            limits: LimitsConfig::default(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8000".to_string()
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent requests (default: 100).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Whole-request timeout in seconds (default: 600). Must exceed the
    /// longest per-attempt deadline times the attempt count to be useful.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// How long in-flight requests may drain on shutdown (default: 30).
    #[serde(default = "default_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            request_timeout_secs: default_timeout(),
            shutdown_grace_secs: default_grace(),
        }
    }
}

impl LimitsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_max_concurrent() -> usize {
    100
}

fn default_timeout() -> u64 {
    600
}

fn default_grace() -> u64 {
    30
}

/// Policy document location.
#[derive(Debug, Clone, Deserialize)]
pub struct PoliciesConfig {
    /// Directory holding `routing.yaml`, `caching.yaml`, ... (default: `policies`).
    #[serde(default = "default_policies_dir")]
    pub dir: PathBuf,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            dir: default_policies_dir(),
        }
    }
}

fn default_policies_dir() -> PathBuf {
    PathBuf::from("policies")
}

/// Provider endpoint overrides. A provider is registered whenever its key
/// is available; these sections only adjust where and how it is called.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
    #[serde(default)]
    pub cipher: Option<CipherConfig>,
    #[serde(default)]
    pub replicate: Option<ReplicateConfig>,
    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CipherConfig {
    /// Full image generation URL.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplicateConfig {
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub openai: Option<ApiKeySecret>,
    #[serde(default)]
    pub cipher: Option<ApiKeySecret>,
    #[serde(default)]
    pub replicate: Option<ApiKeySecret>,
    #[serde(default)]
    pub anthropic: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Provider name → environment variable name mapping.
const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("cipher", "CIPHER_API_KEY"),
    ("replicate", "REPLICATE_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
];

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first of
    /// `~/.atelier/config.toml` and `/etc/atelier/config.toml` is used,
    /// falling back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Config::default()),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AtelierError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            AtelierError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(AtelierError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".atelier").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/atelier/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply policy location and provider settings to a gateway builder.
    pub fn configure(&self, mut builder: AtelierBuilder, secrets: &Secrets) -> AtelierBuilder {
        builder = builder.policies_dir(&self.policies.dir);
        let providers = &self.providers;

        if let Some(key) = secrets.api_key("openai") {
            builder = builder.openai(key);
            if let Some(openai) = &providers.openai {
                if let Some(url) = &openai.base_url {
                    builder = builder.openai_base_url(url);
                }
                if let Some(model) = &openai.image_model {
                    builder = builder.openai_image_model(model);
                }
                if let Some(model) = &openai.chat_model {
                    builder = builder.openai_chat_model(model);
                }
            }
        }

        if let Some(key) = secrets.api_key("cipher") {
            builder = builder.cipher(key);
            if let Some(url) = providers.cipher.as_ref().and_then(|c| c.url.as_ref()) {
                builder = builder.cipher_url(url);
            }
        }

        if let Some(key) = secrets.api_key("replicate") {
            builder = builder.replicate(key);
            if let Some(url) = providers.replicate.as_ref().and_then(|r| r.base_url.as_ref()) {
                builder = builder.replicate_base_url(url);
            }
        }

        if let Some(key) = secrets.api_key("anthropic") {
            builder = builder.anthropic(key);
            if let Some(anthropic) = &providers.anthropic {
                if let Some(url) = &anthropic.base_url {
                    builder = builder.anthropic_base_url(url);
                }
                if let Some(model) = &anthropic.model {
                    builder = builder.anthropic_model(model);
                }
            }
        }

        builder
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.atelier/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/atelier/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (providers may use env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".atelier").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/atelier/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AtelierError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            AtelierError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    pub fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            AtelierError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(AtelierError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Get API key for a provider, falling back to the corresponding environment variable.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let from_file = match provider {
            "openai" => self.openai.as_ref(),
            "cipher" => self.cipher.as_ref(),
            "replicate" => self.replicate.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            _ => None,
        }
        .map(|s| s.api_key.clone());

        from_file.or_else(|| {
            PROVIDER_ENV_VARS
                .iter()
                .find(|(name, _)| *name == provider)
                .and_then(|(_, env_var)| std::env::var(env_var).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:8000");
        assert_eq!(config.server.limits.max_concurrent_requests, 100);
        assert_eq!(config.server.limits.request_timeout_secs, 600);
        assert_eq!(config.server.limits.shutdown_grace_secs, 30);
        assert_eq!(config.policies.dir, PathBuf::from("policies"));
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [server]
            address = "0.0.0.0:8000"

            [server.limits]
            max_concurrent_requests = 50
            request_timeout_secs = 300
            shutdown_grace_secs = 10

            [policies]
            dir = "/etc/atelier/policies"

            [providers.openai]
            base_url = "http://localhost:4010"
            image_model = "dall-e-2"

            [providers.cipher]
            url = "https://cipher.example/v1/images/generations"

            [providers.anthropic]
            model = "claude-3-5-haiku-latest"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.limits.max_concurrent_requests, 50);
        assert_eq!(config.server.limits.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(config.policies.dir, PathBuf::from("/etc/atelier/policies"));
        let openai = config.providers.openai.unwrap();
        assert_eq!(openai.base_url.as_deref(), Some("http://localhost:4010"));
        assert_eq!(openai.image_model.as_deref(), Some("dall-e-2"));
        assert!(openai.chat_model.is_none());
        assert!(config.providers.replicate.is_none());
    }

    #[test]
    fn parse_secrets() {
        let toml = r#"
            [openai]
            api_key = "sk-test-key"

            [replicate]
            api_key = "r8-test-key"
        "#;
        let secrets: Secrets = toml::from_str(toml).unwrap();
        assert_eq!(secrets.openai.as_ref().unwrap().api_key, "sk-test-key");
        assert_eq!(secrets.replicate.as_ref().unwrap().api_key, "r8-test-key");
        assert!(secrets.cipher.is_none());
    }

    #[test]
    fn api_key_from_secrets() {
        let secrets = Secrets {
            cipher: Some(ApiKeySecret {
                api_key: "from-file".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(secrets.api_key("cipher"), Some("from-file".to_string()));
        assert_eq!(secrets.api_key("nonexistent"), None);
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_secrets_are_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "[openai]\napi_key = \"k\"\n").unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(Secrets::check_permissions(&path).is_err());

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(Secrets::check_permissions(&path).is_ok());
        assert_eq!(
            Secrets::load_from_file(&path).unwrap().api_key("openai"),
            Some("k".to_string())
        );
    }
}
