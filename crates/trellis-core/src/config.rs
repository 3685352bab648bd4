use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};

/// Configuration for the batch/retry sub-loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Checklist items per batch payload.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum number of additional dispatch rounds after the first.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Opaque context string passed verbatim to every generation call.
    #[serde(default)]
    pub context: String,
    /// Separator between aggregated batch results.
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_batch_size() -> usize {
    3
}

fn default_retry_ceiling() -> u32 {
    3
}

fn default_separator() -> String {
    "\n---\n".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_ceiling: default_retry_ceiling(),
            context: String::new(),
            separator: default_separator(),
        }
    }
}

impl AuditConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrellisError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Model settings for the text-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    /// Raw key, or a `${ENV_VAR}` reference resolved at use time.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl ModelConfig {
    /// Resolve the configured API key, expanding `${ENV_VAR}` references.
    pub fn resolve_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref()?;
        if let Some(name) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            std::env::var(name).ok()
        } else {
            Some(raw.to_string())
        }
    }
}

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields defaults;
    /// invalid values are rejected here, before any pipeline starts.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)?;
        config.audit.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.retry_ceiling, 3);
        assert_eq!(config.separator, "\n---\n");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = AuditConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TrellisError::Config(_))));
    }

    #[test]
    fn test_retry_ceiling_zero_is_valid() {
        let config = AuditConfig {
            retry_ceiling: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_api_key_literal() {
        let config = ModelConfig {
            provider: "openai".into(),
            model_id: "gpt-4".into(),
            api_key: Some("sk-test".into()),
            base_url: None,
            temperature: 0.0,
            max_tokens: 1024,
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_resolve_api_key_env_reference() {
        std::env::set_var("TRELLIS_TEST_KEY", "from-env");
        let config = ModelConfig {
            provider: "openai".into(),
            model_id: "gpt-4".into(),
            api_key: Some("${TRELLIS_TEST_KEY}".into()),
            base_url: None,
            temperature: 0.0,
            max_tokens: 1024,
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("from-env"));
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [model]
            model_id = "gpt-4"

            [audit]
            batch_size = 5
            context = "Sample context for auditing."
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.model.unwrap().model_id, "gpt-4");
        assert_eq!(config.audit.batch_size, 5);
        assert_eq!(config.audit.retry_ceiling, 3);
        assert_eq!(config.audit.context, "Sample context for auditing.");
    }
}
