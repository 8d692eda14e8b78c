//! Text-classification collaborator.
//!
//! Free-text classification is delegated to a completion backend behind
//! the `CompletionProvider` trait. Every call site that affects state
//! keeps a deterministic heuristic fallback, so the scheduling core stays
//! correct when no backend is configured or the network is down.

pub mod http;
pub mod provider;
pub(crate) mod retry;

pub use http::HttpCompletionProvider;
pub use provider::*;

use std::sync::Arc;

use crate::error::ClassifierError;

/// Configuration for creating a completion provider.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create a completion provider from configuration.
pub fn create_provider(
    config: &ClassifierConfig,
) -> Result<Arc<dyn CompletionProvider>, ClassifierError> {
    let provider = HttpCompletionProvider::new(
        config.base_url.clone(),
        config.api_key.clone(),
        config.model.clone(),
    )?;
    tracing::info!(model = %config.model, "Using completion classifier");
    Ok(Arc::new(provider))
}

/// Ask the provider for a JSON object matching `schema_hint` and parse it.
///
/// Markdown code fences around the JSON are tolerated. Callers treat any
/// error as "classifier unavailable" and fall back to heuristics.
pub async fn extract_json(
    provider: &dyn CompletionProvider,
    schema_hint: &str,
    prompt: &str,
) -> Result<serde_json::Value, ClassifierError> {
    let messages = vec![
        ChatMessage::system(format!(
            "You are a classification assistant. Output only valid JSON.\n{schema_hint}"
        )),
        ChatMessage::user(prompt),
    ];
    let request = CompletionRequest::new(messages)
        .with_max_tokens(512)
        .with_temperature(0.0);
    let response = provider.complete(request).await?;
    let text = strip_code_fences(response.content.trim());
    serde_json::from_str(text).map_err(|e| ClassifierError::InvalidResponse {
        provider: provider.model_name().to_string(),
        reason: format!("expected JSON, got parse error: {e}"),
    })
}

/// Strip a surrounding ```json fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_constructs_with_any_key() {
        // HTTP providers accept any string as API key at construction
        // time; auth failures surface on the first request.
        let config = ClassifierConfig {
            base_url: "https://api.example.com".into(),
            api_key: secrecy::SecretString::from("test-key"),
            model: "test-model".into(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "test-model");
    }

    #[test]
    fn strips_json_code_fences() {
        assert_eq!(
            strip_code_fences("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
    }
}
