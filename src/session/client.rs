//! Authenticated chat-provider web session.
//!
//! A session is a cookie-carrying HTTP client bound to one organisation.
//! Asking about a PDF is a four-call conversation:
//!
//! ```text
//! POST /api/{org}/upload                                   → file_uuid
//! POST /api/organizations/{org}/chat_conversations         → conversation uuid
//! POST /api/organizations/{org}/chat_conversations/{c}/completion  (SSE)
//! DELETE /api/organizations/{org}/chat_conversations/{c}
//! ```
//!
//! Conversations on one session are serialised by an internal mutex; the
//! provider rejects parallel completions on a web session.

use super::cookies::{cookie_header, StoredCookie};
use super::TRACING_TARGET;
use crate::error::{ModelError, Pdf2JsonError};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// One logged-in chat-provider session.
#[derive(Debug)]
pub struct ChatSession {
    http: reqwest::Client,
    base_url: String,
    organization_id: String,
    cookie_count: usize,
    conversation_lock: Mutex<()>,
}

#[derive(Deserialize)]
struct Organization {
    uuid: String,
    #[serde(default)]
    name: Option<String>,
}

impl ChatSession {
    /// Build a session from stored cookies and resolve the organisation id.
    pub async fn connect(
        base_url: &str,
        cookies: &[StoredCookie],
        timeout: Duration,
    ) -> Result<Self, Pdf2JsonError> {
        let header = cookie_header(cookies);
        if header.is_empty() {
            return Err(Pdf2JsonError::SessionUnavailable(
                "cookie file holds no valid cookies".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&header)
                .map_err(|e| Pdf2JsonError::SessionUnavailable(format!("invalid cookie value: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("edgequake-pdf2json/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Pdf2JsonError::Internal(format!("HTTP client: {e}")))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let organization_id = fetch_organization(&http, &base_url).await?;
        tracing::info!(
            target: TRACING_TARGET,
            organization_id = %organization_id,
            cookies = cookies.len(),
            "Chat-provider session ready"
        );

        Ok(Self {
            http,
            base_url,
            organization_id,
            cookie_count: cookies.len(),
            conversation_lock: Mutex::new(()),
        })
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn cookie_count(&self) -> usize {
        self.cookie_count
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Upload a PDF, ask `prompt` about it and return the streamed answer.
    ///
    /// The conversation is deleted afterwards whatever the outcome.
    pub async fn ask_about_file(
        &self,
        pdf: &Path,
        file_name: &str,
        prompt: &str,
    ) -> Result<String, ModelError> {
        let _guard = self.conversation_lock.lock().await;

        let file_uuid = self.upload(pdf, file_name).await?;
        let conversation = self.create_conversation().await?;
        let cleanup = ConversationCleanup::new(self.http.clone(), self.conversation_url(&conversation));
        let answer = self.completion(&conversation, &file_uuid, prompt).await;
        cleanup.finish().await;
        answer
    }

    fn conversation_url(&self, conversation: &str) -> String {
        self.url(&format!(
            "api/organizations/{}/chat_conversations/{}",
            self.organization_id, conversation
        ))
    }

    async fn upload(&self, pdf: &Path, file_name: &str) -> Result<String, ModelError> {
        let bytes = tokio::fs::read(pdf)
            .await
            .map_err(|e| ModelError::Rejected(format!("cannot read {}: {e}", pdf.display())))?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| ModelError::Rejected(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url(&format!("api/{}/upload", self.organization_id)))
            .multipart(form)
            .send()
            .await
            .map_err(crate::model::transport_error)?;
        let body: Value = success_json(response).await?;

        let file_uuid = body
            .get("file_uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::Transient("upload response has no file_uuid".into()))?;
        tracing::debug!(target: TRACING_TARGET, file_uuid, "File uploaded");
        Ok(file_uuid.to_string())
    }

    async fn create_conversation(&self) -> Result<String, ModelError> {
        let response = self
            .http
            .post(self.url(&format!(
                "api/organizations/{}/chat_conversations",
                self.organization_id
            )))
            .json(&json!({"uuid": uuid::Uuid::new_v4().to_string(), "name": ""}))
            .send()
            .await
            .map_err(crate::model::transport_error)?;
        let body: Value = success_json(response).await?;

        body.get("uuid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ModelError::Transient("conversation response has no uuid".into()))
    }

    async fn completion(
        &self,
        conversation: &str,
        file_uuid: &str,
        prompt: &str,
    ) -> Result<String, ModelError> {
        let response = self
            .http
            .post(self.url(&format!(
                "api/organizations/{}/chat_conversations/{}/completion",
                self.organization_id, conversation
            )))
            .header(ACCEPT, "text/event-stream")
            .json(&json!({
                "prompt": prompt,
                "timezone": "America/Lima",
                "locale": "es-419",
                "attachments": [],
                "files": [file_uuid],
                "rendering_mode": "messages"
            }))
            .send()
            .await
            .map_err(crate::model::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status.as_u16(), &text));
        }

        let mut collector = SseCollector::default();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();
        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(crate::model::transport_error)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                if collector.push_line(&line) {
                    break 'read;
                }
            }
        }
        if !buffer.is_empty() {
            collector.push_line(&buffer);
        }

        let text = collector.text.trim().to_string();
        if text.is_empty() {
            return Err(ModelError::Transient("completion stream carried no text".into()));
        }
        tracing::debug!(target: TRACING_TARGET, chars = text.chars().count(), "Completion received");
        Ok(text)
    }
}

/// Deletes a conversation once its completion is over.
///
/// `finish` deletes inline. If the owning future is dropped first (a model
/// call timeout cancels `ask_about_file` mid-stream) the delete is spawned on
/// the runtime instead.
struct ConversationCleanup {
    pending: Option<(reqwest::Client, String)>,
}

impl ConversationCleanup {
    fn new(http: reqwest::Client, url: String) -> Self {
        Self {
            pending: Some((http, url)),
        }
    }

    async fn finish(mut self) {
        if let Some((http, url)) = self.pending.take() {
            delete_conversation(http, url).await;
        }
    }
}

impl Drop for ConversationCleanup {
    fn drop(&mut self) {
        let Some((http, url)) = self.pending.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(target: TRACING_TARGET, url = %url, "Completion cancelled, deleting conversation");
                handle.spawn(delete_conversation(http, url));
            }
            Err(_) => tracing::warn!(target: TRACING_TARGET, url = %url, "Conversation left behind: no runtime"),
        }
    }
}

async fn delete_conversation(http: reqwest::Client, url: String) {
    match http.delete(&url).send().await {
        Ok(r) if r.status().is_success() => {
            tracing::debug!(target: TRACING_TARGET, url = %url, "Conversation deleted")
        }
        Ok(r) => tracing::warn!(
            target: TRACING_TARGET,
            url = %url,
            status = r.status().as_u16(),
            "Conversation delete refused"
        ),
        Err(e) => tracing::warn!(target: TRACING_TARGET, url = %url, "Conversation delete failed: {e}"),
    }
}

async fn fetch_organization(http: &reqwest::Client, base_url: &str) -> Result<String, Pdf2JsonError> {
    let unavailable = |detail: String| Pdf2JsonError::SessionUnavailable(detail);

    let response = http
        .get(format!("{base_url}/api/organizations"))
        .send()
        .await
        .map_err(|e| unavailable(format!("organizations request failed: {e}")))?;

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(Pdf2JsonError::ModelAuth {
            provider: "chat-session".into(),
            detail: "stored cookies were rejected; log in again".into(),
        });
    }
    if !status.is_success() {
        return Err(unavailable(format!("organizations request returned HTTP {status}")));
    }

    let orgs: Vec<Organization> = response
        .json()
        .await
        .map_err(|e| unavailable(format!("unreadable organizations response: {e}")))?;
    let first = orgs
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("account has no organizations".into()))?;
    tracing::debug!(
        target: TRACING_TARGET,
        name = first.name.as_deref().unwrap_or("unnamed"),
        "Organization found"
    );
    Ok(first.uuid)
}

async fn success_json(response: reqwest::Response) -> Result<Value, ModelError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ModelError::from_status(status.as_u16(), &text));
    }
    response.json().await.map_err(crate::model::transport_error)
}

/// Accumulates `text_delta` payloads of a completion event stream.
#[derive(Debug, Default)]
pub(crate) struct SseCollector {
    pub(crate) text: String,
}

impl SseCollector {
    /// Feed one line. Returns true once `message_stop` was seen.
    pub(crate) fn push_line(&mut self, line: &str) -> bool {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return false;
        };
        let Ok(event) = serde_json::from_str::<Value>(data.trim()) else {
            return false;
        };
        match event.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => {
                let delta = &event["delta"];
                if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                    if let Some(t) = delta.get("text").and_then(Value::as_str) {
                        self.text.push_str(t);
                    }
                }
                false
            }
            Some("message_stop") => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_text_deltas_until_stop() {
        let mut c = SseCollector::default();
        let lines = [
            "event: message_start",
            r#"data: {"type":"message_start"}"#,
            r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"{\"documento\":"}}"#,
            "",
            r#"data: {"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"x"}}"#,
            r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":" {}}"}}"#,
            "data: not json",
        ];
        for l in lines {
            assert!(!c.push_line(l));
        }
        assert!(c.push_line(r#"data: {"type":"message_stop"}"#));
        assert_eq!(c.text, "{\"documento\": {}}");
    }
}
