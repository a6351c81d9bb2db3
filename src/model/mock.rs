//! A model that replays canned answers.

use super::{ModelRequest, VisionModel};
use crate::config::PipelineMode;
use crate::error::ModelError;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued answers in order and records every request it receives.
///
/// Once the queue is empty the last answer is repeated, so a single-answer
/// model serves any number of calls.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    answers: Mutex<VecDeque<Result<String, ModelError>>>,
    last: Mutex<Option<Result<String, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model that always answers `text`.
    pub fn answering(text: impl Into<String>) -> Self {
        Self::new().then_answer(text)
    }

    pub fn then_answer(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn then_fail(self, err: ModelError) -> Self {
        self.push(Err(err))
    }

    fn push(self, answer: Result<String, ModelError>) -> Self {
        if let Ok(mut q) = self.answers.lock() {
            q.push_back(answer);
        }
        self
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Copies of the requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl VisionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, _mode: PipelineMode) -> bool {
        true
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        let next = self.answers.lock().ok().and_then(|mut q| q.pop_front());
        let mut last = self
            .last
            .lock()
            .map_err(|_| ModelError::Transient("scripted model poisoned".into()))?;
        match next {
            Some(answer) => {
                *last = Some(answer.clone());
                answer
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(ModelError::Rejected("no scripted answer".into()))),
        }
    }
}
