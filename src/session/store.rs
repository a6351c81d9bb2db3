//! Process-wide holder of the current chat-provider session.

use super::client::ChatSession;
use super::cookies::load_cookies;
use super::TRACING_TARGET;
use crate::error::Pdf2JsonError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Holds at most one [`ChatSession`].
///
/// Readers clone the `Arc` and release the lock immediately, so a request
/// keeps using the session it started with. [`SessionStore::reload`] builds
/// a complete new session before taking the write lock and swapping it in;
/// nobody ever observes a half-initialised session.
#[derive(Debug)]
pub struct SessionStore {
    current: RwLock<Option<Arc<ChatSession>>>,
    base_url: Option<String>,
    cookies_file: PathBuf,
    timeout: Duration,
}

impl SessionStore {
    /// `base_url` None disables the chat-provider features.
    pub fn new(base_url: Option<String>, cookies_file: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            base_url: base_url.filter(|u| !u.trim().is_empty()),
            cookies_file: cookies_file.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn cookies_file(&self) -> &Path {
        &self.cookies_file
    }

    /// The session in use, if any.
    pub async fn current(&self) -> Option<Arc<ChatSession>> {
        self.current.read().await.clone()
    }

    /// The session in use, or a 503-class error.
    pub async fn require(&self) -> Result<Arc<ChatSession>, Pdf2JsonError> {
        self.current().await.ok_or_else(|| {
            Pdf2JsonError::SessionUnavailable(
                "not authenticated; use /auth/send-code first".into(),
            )
        })
    }

    pub async fn is_loaded(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Replace the current session.
    pub async fn swap(&self, session: Option<Arc<ChatSession>>) -> Option<Arc<ChatSession>> {
        let mut guard = self.current.write().await;
        std::mem::replace(&mut *guard, session)
    }

    /// Build a fresh session from the cookie file and swap it in.
    ///
    /// On failure the previous session stays in place.
    pub async fn reload(&self) -> Result<Arc<ChatSession>, Pdf2JsonError> {
        let base_url = self.base_url.as_deref().ok_or_else(|| {
            Pdf2JsonError::SessionUnavailable("CHAT_PROVIDER_URL is not configured".into())
        })?;
        let cookies = load_cookies(&self.cookies_file).await?;
        let session = Arc::new(ChatSession::connect(base_url, &cookies, self.timeout).await?);
        self.swap(Some(Arc::clone(&session))).await;
        tracing::info!(
            target: TRACING_TARGET,
            organization_id = session.organization_id(),
            "Chat-provider session reloaded"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_store_is_unavailable() {
        let store = SessionStore::new(None, "/nonexistent/cookies.json", Duration::from_secs(1));
        assert!(!store.is_loaded().await);
        assert!(matches!(
            store.require().await,
            Err(Pdf2JsonError::SessionUnavailable(_))
        ));
        assert!(matches!(
            store.reload().await,
            Err(Pdf2JsonError::SessionUnavailable(_))
        ));
    }

    #[test]
    fn blank_base_url_disables_sessions() {
        let store = SessionStore::new(Some("  ".into()), "c.json", Duration::from_secs(1));
        assert!(store.base_url().is_none());
    }
}
