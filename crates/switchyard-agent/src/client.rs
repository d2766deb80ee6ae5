// ABOUTME: Factory for model backends from a provider name and the process environment.
// ABOUTME: Resolves keys, base URLs, and models per provider; also backs per-specialist overrides.

use std::env;
use std::sync::Arc;

use crate::controller::BackendFactory;
use crate::providers::anthropic::{self, AnthropicBackend};
use crate::providers::openai::{self, OpenAiBackend};
use crate::roster::SpecialistDef;
use crate::runtime::ModelBackend;

/// Create a model backend for the given provider name.
///
/// The model is resolved from:
/// 1. The explicit `model` parameter (if Some)
/// 2. A provider-specific environment variable (e.g. ANTHROPIC_MODEL)
/// 3. A sensible default for that provider
pub fn create_backend(
    provider: &str,
    model: Option<&str>,
) -> Result<Arc<dyn ModelBackend>, anyhow::Error> {
    match provider {
        "anthropic" => {
            let api_key = env::var("ANTHROPIC_API_KEY")
                .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
            let base_url = env_or("ANTHROPIC_BASE_URL", anthropic::DEFAULT_BASE_URL);
            let model = resolve_model(model, "ANTHROPIC_MODEL", anthropic::DEFAULT_MODEL);
            Ok(Arc::new(AnthropicBackend::new(api_key, base_url, model)))
        }
        "openai" => {
            let api_key = env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            let base_url = env_or("OPENAI_BASE_URL", openai::DEFAULT_BASE_URL);
            let model = resolve_model(model, "OPENAI_MODEL", openai::DEFAULT_MODEL);
            Ok(Arc::new(OpenAiBackend::new(api_key, base_url, model)))
        }
        "ollama" => {
            let base_url = env_or("OLLAMA_BASE_URL", openai::OLLAMA_BASE_URL);
            let model = resolve_model(model, "OLLAMA_MODEL", openai::OLLAMA_MODEL);
            Ok(Arc::new(OpenAiBackend::ollama(base_url, model)))
        }
        unknown => Err(anyhow::anyhow!("unsupported LLM provider: {}", unknown)),
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn resolve_model(explicit: Option<&str>, var: &str, default: &str) -> String {
    explicit
        .map(String::from)
        .unwrap_or_else(|| env_or(var, default))
}

/// Builds specialist backends from the environment, honoring a specialist's
/// own provider and model when its roster entry names them.
#[derive(Debug, Clone)]
pub struct EnvBackendFactory {
    pub default_provider: String,
    pub default_model: Option<String>,
}

impl EnvBackendFactory {
    pub fn new(default_provider: impl Into<String>, default_model: Option<String>) -> Self {
        Self {
            default_provider: default_provider.into(),
            default_model,
        }
    }
}

impl BackendFactory for EnvBackendFactory {
    fn backend_for(&self, def: &SpecialistDef) -> anyhow::Result<Arc<dyn ModelBackend>> {
        let provider = def.provider.as_deref().unwrap_or(&self.default_provider);
        // A default model only makes sense for the default provider.
        let model = match (&def.model, &def.provider) {
            (Some(model), _) => Some(model.as_str()),
            (None, None) => self.default_model.as_deref(),
            (None, Some(_)) => None,
        };
        create_backend(provider, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all tests that read/write env vars to prevent race conditions.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Uses match instead of unwrap_err() because Arc<dyn ModelBackend> doesn't impl Debug.
    fn expect_err(result: Result<Arc<dyn ModelBackend>, anyhow::Error>) -> String {
        match result {
            Err(e) => e.to_string(),
            Ok(backend) => panic!("expected error, got backend for {}", backend.model_name()),
        }
    }

    fn expect_ok(result: Result<Arc<dyn ModelBackend>, anyhow::Error>) -> Arc<dyn ModelBackend> {
        match result {
            Ok(backend) => backend,
            Err(e) => panic!("expected Ok, got Err: {}", e),
        }
    }

    fn specialist(provider: Option<&str>, model: Option<&str>) -> SpecialistDef {
        SpecialistDef {
            name: "CodingAgent".to_string(),
            description: "d".to_string(),
            system_prompt: "p".to_string(),
            allowed_tools: vec![],
            provider: provider.map(String::from),
            model: model.map(String::from),
        }
    }

    #[test]
    fn unknown_provider_returns_error() {
        let err = expect_err(create_backend("unknown", None));
        assert!(
            err.contains("unsupported LLM provider"),
            "expected 'unsupported LLM provider' in error, got: {}",
            err
        );
    }

    #[test]
    fn anthropic_missing_api_key_returns_error() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { env::remove_var("ANTHROPIC_API_KEY") };
        let err = expect_err(create_backend("anthropic", None));
        assert!(err.contains("ANTHROPIC_API_KEY"), "got: {}", err);
    }

    #[test]
    fn openai_missing_api_key_returns_error() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { env::remove_var("OPENAI_API_KEY") };
        let err = expect_err(create_backend("openai", None));
        assert!(err.contains("OPENAI_API_KEY"), "got: {}", err);
    }

    #[test]
    fn anthropic_success_returns_default_model() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe {
            env::set_var("ANTHROPIC_API_KEY", "test-key-123");
            env::remove_var("ANTHROPIC_MODEL");
        }

        let result = create_backend("anthropic", None);

        unsafe { env::remove_var("ANTHROPIC_API_KEY") };

        let backend = expect_ok(result);
        assert_eq!(backend.provider_name(), "anthropic");
        assert_eq!(backend.model_name(), "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn explicit_model_param_overrides_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("OPENAI_MODEL", "gpt-4o-mini");
        }

        let explicit = create_backend("openai", Some("gpt-4.1"));
        let from_env = create_backend("openai", None);

        unsafe {
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_MODEL");
        }

        assert_eq!(expect_ok(explicit).model_name(), "gpt-4.1");
        assert_eq!(expect_ok(from_env).model_name(), "gpt-4o-mini");
    }

    #[test]
    fn ollama_needs_no_key() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { env::remove_var("OLLAMA_MODEL") };
        let backend = expect_ok(create_backend("ollama", None));
        assert_eq!(backend.provider_name(), "ollama");
        assert_eq!(backend.model_name(), "llama3.1");
    }

    #[test]
    fn factory_honors_specialist_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { env::remove_var("OLLAMA_MODEL") };
        let factory = EnvBackendFactory::new("ollama", Some("qwen2.5".to_string()));

        let inherited = expect_ok(factory.backend_for(&specialist(None, None)));
        assert_eq!(inherited.model_name(), "qwen2.5");

        let own_model = expect_ok(factory.backend_for(&specialist(None, Some("mistral"))));
        assert_eq!(own_model.model_name(), "mistral");

        let err = expect_err(factory.backend_for(&specialist(Some("nope"), None)));
        assert!(err.contains("unsupported LLM provider"));
    }
}
