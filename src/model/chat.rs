//! The chat-provider web session as a model backend.

use super::{ModelInput, ModelRequest, VisionModel};
use crate::config::PipelineMode;
use crate::error::ModelError;
use crate::session::SessionStore;
use std::sync::Arc;

/// Sends the PDF itself through the current [`crate::session::ChatSession`].
///
/// The session is looked up on every call, so a reload between retries is
/// picked up immediately.
#[derive(Debug, Clone)]
pub struct ChatSessionModel {
    sessions: Arc<SessionStore>,
}

impl ChatSessionModel {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait::async_trait]
impl VisionModel for ChatSessionModel {
    fn name(&self) -> &str {
        "chat-session"
    }

    fn supports(&self, mode: PipelineMode) -> bool {
        mode == PipelineMode::Document
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let ModelInput::Document { path, file_name } = &request.input else {
            return Err(ModelError::Unsupported(
                "the chat session only accepts the PDF file itself".into(),
            ));
        };
        let session = self
            .sessions
            .current()
            .await
            .ok_or_else(|| ModelError::Auth("no chat-provider session loaded".into()))?;

        // Web sessions have no separate system turn.
        let prompt = format!("{}\n\n{}", request.system, request.user_text());
        session.ask_about_file(path, file_name, &prompt).await
    }
}
