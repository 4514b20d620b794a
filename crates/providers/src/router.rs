//! Provider router: selects the LLM backend for a run.
//!
//! Adapters are built once from config and looked up by [`ProviderKind`].
//! A backend with no usable credentials is simply absent, so resolving it
//! yields `ProviderError::NotConfigured` instead of a failing HTTP call.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use stockchat_config::AppConfig;
use stockchat_core::error::ProviderError;
use stockchat_core::provider::Provider;
use tracing::{debug, info};

use crate::anthropic::AnthropicProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Ollama];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }

    /// Model used when config names none.
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Ollama => "qwen2.5",
        }
    }

    fn needs_api_key(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(ProviderError::NotConfigured(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

struct Route {
    provider: Arc<dyn Provider>,
    model: String,
}

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    routes: HashMap<ProviderKind, Route>,
    default_kind: ProviderKind,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_kind: ProviderKind) -> Self {
        Self {
            routes: HashMap::new(),
            default_kind,
        }
    }

    /// Register a provider together with the model it should be asked for.
    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn Provider>, model: impl Into<String>) {
        self.routes.insert(
            kind,
            Route {
                provider,
                model: model.into(),
            },
        );
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default_kind
    }

    /// The adapter and model for `kind`.
    pub fn resolve(&self, kind: ProviderKind) -> Result<(Arc<dyn Provider>, String), ProviderError> {
        self.routes
            .get(&kind)
            .map(|r| (Arc::clone(&r.provider), r.model.clone()))
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("{kind} (no API key or endpoint configured)"))
            })
    }

    /// Whether `kind` can be resolved.
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.routes.contains_key(&kind)
    }

    /// List all registered provider kinds, in declaration order.
    pub fn list(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.routes.contains_key(k))
            .collect()
    }
}

/// Build providers from configuration.
///
/// A backend that needs an API key is only registered when one is found.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let default_kind: ProviderKind = config.default_provider.parse()?;
    let mut router = ProviderRouter::new(default_kind);
    let timeout = Duration::from_secs(config.llm.request_timeout_secs);

    for kind in ProviderKind::ALL {
        let settings = config.provider(kind.as_str());
        let api_key = config.api_key_for(kind.as_str()).filter(|k| !k.is_empty());

        if kind.needs_api_key() && api_key.is_none() {
            debug!(provider = %kind, "Skipping provider without API key");
            continue;
        }

        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| kind.default_model().to_string());

        let provider: Arc<dyn Provider> = match kind {
            ProviderKind::OpenAi => {
                let base_url = settings
                    .api_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".into());
                Arc::new(OpenAiCompatProvider::new(
                    "openai",
                    base_url,
                    api_key.unwrap_or_default(),
                    timeout,
                )?)
            }
            ProviderKind::Anthropic => {
                let mut p = AnthropicProvider::new(api_key.unwrap_or_default(), timeout)?;
                if let Some(url) = &settings.api_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::Ollama => Arc::new(
                OllamaProvider::new(settings.api_url.as_deref(), timeout)?
                    .with_api_key(settings.api_key.clone()),
            ),
        };

        info!(provider = %kind, model = %model, "Registered provider");
        router.register(kind, provider, model);
    }

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockchat_config::ProviderConfig;

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!(" ollama ".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("gemini".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Anthropic.to_string(), "anthropic");
    }

    #[test]
    fn keyless_default_config_only_has_ollama() {
        let config = AppConfig::default();
        let router = build_from_config(&config).unwrap();
        assert_eq!(router.default_kind(), ProviderKind::OpenAi);
        assert_eq!(router.list(), vec![ProviderKind::Ollama]);

        let err = router.resolve(ProviderKind::OpenAi).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn configured_providers_resolve_with_model() {
        let mut config = AppConfig::default();
        config.api_key = Some("shared-key".into());
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                model: Some("claude-3-5-haiku-latest".into()),
                ..ProviderConfig::default()
            },
        );

        let router = build_from_config(&config).unwrap();
        assert_eq!(router.list().len(), 3);

        let (provider, model) = router.resolve(ProviderKind::Anthropic).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(model, "claude-3-5-haiku-latest");

        let (provider, model) = router.resolve(ProviderKind::OpenAi).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(model, "gpt-4o-mini");
    }
}
