//! Any `edgequake-llm` provider (OpenAI, Anthropic, Gemini, Mistral, …).

use super::{ModelInput, ModelRequest, VisionModel, TRACING_TARGET};
use crate::config::PipelineMode;
use crate::error::{ModelError, Pdf2JsonError};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;

/// Wraps an `edgequake-llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl std::fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderModel")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ProviderModel {
    /// Create a provider by name (`openai`, `anthropic`, `gemini`, …) and model.
    ///
    /// API keys are read from the provider's usual environment variables.
    pub fn create(provider_name: &str, model: &str) -> Result<Self, Pdf2JsonError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            Pdf2JsonError::ModelNotConfigured {
                provider: provider_name.to_string(),
                hint: e.to_string(),
            }
        })?;
        Ok(Self {
            provider,
            label: format!("{provider_name}:{model}"),
        })
    }

    /// Auto-detect a provider from the API keys present in the environment.
    pub fn from_env() -> Result<Self, Pdf2JsonError> {
        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| Pdf2JsonError::ModelNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "no LLM provider could be auto-detected from environment; \
                     set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY ({e})"
                ),
            })?;
        Ok(Self {
            provider,
            label: "auto".to_string(),
        })
    }

    /// Wrap an already constructed provider.
    pub fn from_provider(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    fn messages(request: &ModelRequest) -> Result<Vec<ChatMessage>, ModelError> {
        let user = match &request.input {
            ModelInput::Images(pages) => ChatMessage::user_with_images(
                request.user_text(),
                pages.iter().map(|p| p.image.clone()).collect(),
            ),
            ModelInput::Text(text) => ChatMessage::user_with_images(
                format!("{}\n\n{}", request.user_text(), text),
                Vec::new(),
            ),
            ModelInput::Document { .. } => {
                return Err(ModelError::Unsupported(
                    "edgequake-llm providers take page images or text, not PDF files".into(),
                ))
            }
        };
        Ok(vec![ChatMessage::system(request.system.clone()), user])
    }
}

/// Providers report failures as text; classify by the status it mentions.
fn classify(message: &str) -> ModelError {
    let lower = message.to_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        ModelError::Auth(message.to_string())
    } else if lower.contains("400") || lower.contains("invalid request") {
        ModelError::Rejected(message.to_string())
    } else {
        ModelError::Transient(message.to_string())
    }
}

#[async_trait::async_trait]
impl VisionModel for ProviderModel {
    fn name(&self) -> &str {
        &self.label
    }

    fn supports(&self, mode: PipelineMode) -> bool {
        mode != PipelineMode::Document
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let messages = Self::messages(request)?;
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify(&e.to_string()))?;

        tracing::debug!(
            target: TRACING_TARGET,
            model = %self.label,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "Provider call finished"
        );
        Ok(response.content)
    }
}
