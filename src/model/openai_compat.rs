//! OpenAI-compatible chat-completions client (Groq by default).

use super::{transport_error, ModelInput, ModelRequest, VisionModel, TRACING_TARGET};
use crate::config::PipelineMode;
use crate::error::{ModelError, Pdf2JsonError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Groq's OpenAI-compatible API root.
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Vision model used when none is configured.
pub const GROQ_DEFAULT_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

/// Calls `POST {base_url}/chat/completions` with images as data URIs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatModel {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    label: String,
}

impl OpenAiCompatModel {
    /// Create a client. `base_url` is the API root without `/chat/completions`.
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Pdf2JsonError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Pdf2JsonError::ModelNotConfigured {
                provider: "openai-compatible".into(),
                hint: "set GROQ_API_KEY".into(),
            });
        }
        let base = url::Url::parse(base_url)
            .map_err(|e| Pdf2JsonError::InvalidConfig(format!("invalid model base URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Pdf2JsonError::Internal(format!("HTTP client: {e}")))?;
        let model = model.into();

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base.as_str().trim_end_matches('/')),
            label: format!("{}:{}", base.host_str().unwrap_or("openai-compatible"), model),
            api_key,
            model,
        })
    }

    /// Groq with the default vision model.
    pub fn groq(api_key: impl Into<String>, timeout: Duration) -> Result<Self, Pdf2JsonError> {
        Self::new(GROQ_BASE_URL, api_key, GROQ_DEFAULT_MODEL, timeout)
    }

    fn body(&self, request: &ModelRequest) -> Result<ChatBody, ModelError> {
        let user = match &request.input {
            ModelInput::Images(pages) => {
                let mut parts = vec![json!({"type": "text", "text": request.user_text()})];
                parts.extend(pages.iter().map(|p| {
                    json!({"type": "image_url", "image_url": {"url": p.data_uri()}})
                }));
                Value::Array(parts)
            }
            ModelInput::Text(text) => {
                Value::String(format!("{}\n\n{}", request.user_text(), text))
            }
            ModelInput::Document { .. } => {
                return Err(ModelError::Unsupported(
                    "OpenAI-compatible APIs take page images or text, not PDF files".into(),
                ))
            }
        };

        Ok(ChatBody {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                json!({"role": "system", "content": request.system}),
                json!({"role": "user", "content": user}),
            ],
        })
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<Value>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait::async_trait]
impl VisionModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.label
    }

    fn supports(&self, mode: PipelineMode) -> bool {
        mode != PipelineMode::Document
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let body = self.body(request)?;
        tracing::debug!(target: TRACING_TARGET, model = %self.model, "POST {}", self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status.as_u16(), &text));
        }

        let completion: ChatCompletion = response.json().await.map_err(transport_error)?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Transient("response contained no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_not_configured() {
        let err = OpenAiCompatModel::groq("  ", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Pdf2JsonError::ModelNotConfigured { .. }));
    }

    #[test]
    fn endpoint_and_label() {
        let m = OpenAiCompatModel::new(
            "https://api.groq.com/openai/v1/",
            "k",
            "llama",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(m.endpoint, "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(m.name(), "api.groq.com:llama");
        assert!(!m.supports(PipelineMode::Document));
    }

    #[test]
    fn document_input_is_unsupported() {
        let m = OpenAiCompatModel::groq("k", Duration::from_secs(5)).unwrap();
        let req = ModelRequest {
            system: "s".into(),
            prompt: "p".into(),
            correction: None,
            input: ModelInput::Document {
                path: "/tmp/x.pdf".into(),
                file_name: "x.pdf".into(),
            },
            temperature: 0.0,
            max_tokens: 16,
        };
        assert!(matches!(m.body(&req), Err(ModelError::Unsupported(_))));
    }
}
