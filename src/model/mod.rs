//! Model backends behind a single [`VisionModel`] trait.
//!
//! The pipeline never knows which service answers. It builds a
//! [`ModelRequest`] (system message, instruction text, and the document as
//! page images, plain text or the PDF file itself) and receives raw text
//! back, or a [`ModelError`] classified for the retry loop.
//!
//! | Backend | Accepts | Transport |
//! |---------|---------|-----------|
//! | [`OpenAiCompatModel`] | images, text | `POST {base}/chat/completions` (Groq by default) |
//! | [`ProviderModel`] | images, text | any `edgequake-llm` provider |
//! | [`ChatSessionModel`] | document | authenticated chat-provider web session (SSE) |
//! | [`ScriptedModel`] | everything | canned answers, for tests and dry runs |

mod chat;
mod mock;
mod openai_compat;
mod provider;

pub use chat::ChatSessionModel;
pub use mock::ScriptedModel;
pub use openai_compat::{OpenAiCompatModel, GROQ_BASE_URL, GROQ_DEFAULT_MODEL};
pub use provider::ProviderModel;

use crate::config::PipelineMode;
use crate::error::{ModelError, Pdf2JsonError};
use crate::pipeline::encode::PageImage;
use std::path::PathBuf;
use std::sync::Arc;

/// Tracing target for model calls.
pub const TRACING_TARGET: &str = "edgequake_pdf2json::model";

/// Document content attached to a request.
#[derive(Debug, Clone)]
pub enum ModelInput {
    /// Page images in page order.
    Images(Vec<PageImage>),
    /// Normalised document text.
    Text(String),
    /// The PDF file itself.
    Document { path: PathBuf, file_name: String },
}

impl ModelInput {
    pub fn mode(&self) -> PipelineMode {
        match self {
            ModelInput::Images(_) => PipelineMode::Vision,
            ModelInput::Text(_) => PipelineMode::Text,
            ModelInput::Document { .. } => PipelineMode::Document,
        }
    }
}

/// One call to a model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    /// Schema instruction (plus the quoted text in text mode).
    pub prompt: String,
    /// Corrective instruction after a rejected answer.
    pub correction: Option<String>,
    pub input: ModelInput,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl ModelRequest {
    /// The user-turn text: instruction, then the correction if any.
    pub fn user_text(&self) -> String {
        match &self.correction {
            Some(c) => format!("{}\n\n{}", self.prompt, c),
            None => self.prompt.clone(),
        }
    }
}

/// A service that turns a document plus instructions into text.
#[async_trait::async_trait]
pub trait VisionModel: Send + Sync {
    /// Short label for logs and responses (`groq:llama-4…`, `chat-session`).
    fn name(&self) -> &str;

    /// Whether this backend accepts input of the given mode.
    fn supports(&self, mode: PipelineMode) -> bool;

    /// Run one completion. Implementations do not retry.
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// Which backend answers extraction requests, and how to reach it.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// `groq` (default), `openai-compatible`, `auto`, or an `edgequake-llm`
    /// provider name such as `openai`, `anthropic`, `gemini`.
    pub provider: String,
    pub api_key: Option<String>,
    /// API root for `groq` / `openai-compatible`.
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout: std::time::Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            api_key: None,
            base_url: None,
            model: None,
            timeout: std::time::Duration::from_secs(120),
        }
    }
}

/// Build the backend described by `settings`.
pub fn build_model(settings: &ModelSettings) -> Result<Arc<dyn VisionModel>, Pdf2JsonError> {
    let key = || settings.api_key.clone().unwrap_or_default();
    let model = |default: &str| settings.model.clone().unwrap_or_else(|| default.to_string());

    let built: Arc<dyn VisionModel> = match settings.provider.trim().to_lowercase().as_str() {
        "" | "groq" => Arc::new(OpenAiCompatModel::new(
            settings.base_url.as_deref().unwrap_or(GROQ_BASE_URL),
            key(),
            model(GROQ_DEFAULT_MODEL),
            settings.timeout,
        )?),
        "openai-compatible" | "openai_compatible" => {
            let base = settings.base_url.as_deref().ok_or_else(|| {
                Pdf2JsonError::ModelNotConfigured {
                    provider: settings.provider.clone(),
                    hint: "set PDF2JSON_BASE_URL".into(),
                }
            })?;
            Arc::new(OpenAiCompatModel::new(base, key(), model(GROQ_DEFAULT_MODEL), settings.timeout)?)
        }
        "auto" => Arc::new(ProviderModel::from_env()?),
        name => Arc::new(ProviderModel::create(name, &model("gpt-4.1-nano"))?),
    };
    Ok(built)
}

/// Classify a transport-level `reqwest` failure.
pub(crate) fn transport_error(e: reqwest::Error) -> ModelError {
    if let Some(status) = e.status() {
        return ModelError::from_status(status.as_u16(), &e.to_string());
    }
    if e.is_timeout() {
        ModelError::Transient(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ModelError::Transient(format!("connection failed: {e}"))
    } else if e.is_decode() {
        ModelError::Rejected(format!("unreadable response: {e}"))
    } else {
        ModelError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_appends_correction() {
        let mut r = ModelRequest {
            system: "s".into(),
            prompt: "extrae".into(),
            correction: None,
            input: ModelInput::Text("t".into()),
            temperature: 0.0,
            max_tokens: 10,
        };
        assert_eq!(r.user_text(), "extrae");
        r.correction = Some("corrige".into());
        assert_eq!(r.user_text(), "extrae\n\ncorrige");
        assert_eq!(r.input.mode(), PipelineMode::Text);
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = build_model(&ModelSettings::default()).err().unwrap();
        assert!(matches!(err, Pdf2JsonError::ModelNotConfigured { .. }));

        let settings = ModelSettings {
            provider: "openai-compatible".into(),
            api_key: Some("k".into()),
            ..ModelSettings::default()
        };
        let err = build_model(&settings).err().unwrap();
        assert!(matches!(err, Pdf2JsonError::ModelNotConfigured { .. }));
    }

    #[test]
    fn groq_backend_is_labelled_with_its_model() {
        let settings = ModelSettings {
            api_key: Some("gsk_test".into()),
            ..ModelSettings::default()
        };
        let model = build_model(&settings).unwrap();
        assert!(model.name().contains(GROQ_DEFAULT_MODEL), "{}", model.name());
        assert!(model.supports(PipelineMode::Vision));
    }
}
