//! Cookie persistence for the chat-provider session.
//!
//! The file is a JSON array of `{name, value, domain, path, secure, expiry?}`
//! objects. Writes go to a sibling temp file that is renamed over the target,
//! so a reader never sees a half-written file and a failed login leaves the
//! previous cookies untouched.

use crate::error::Pdf2JsonError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// One persisted cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    /// Unix timestamp in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<f64>,
}

fn root_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    /// Convert a cookie received on a response.
    pub fn from_response(cookie: &reqwest::cookie::Cookie<'_>, default_domain: &str) -> Self {
        let expiry = cookie
            .expires()
            .or_else(|| cookie.max_age().map(|age| SystemTime::now() + age))
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());
        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie.domain().unwrap_or(default_domain).to_string(),
            path: cookie.path().unwrap_or("/").to_string(),
            secure: cookie.secure(),
            expiry,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        let now = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.expiry.is_some_and(|e| e <= now)
    }
}

/// Insert or replace by `(name, domain, path)`.
pub fn merge_cookie(into: &mut Vec<StoredCookie>, cookie: StoredCookie) {
    match into
        .iter_mut()
        .find(|c| c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
    {
        Some(existing) => *existing = cookie,
        None => into.push(cookie),
    }
}

/// `Cookie` request-header value from unexpired cookies.
pub fn cookie_header(cookies: &[StoredCookie]) -> String {
    let now = SystemTime::now();
    cookies
        .iter()
        .filter(|c| !c.is_expired(now))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read the cookie file.
pub async fn load_cookies(path: &Path) -> Result<Vec<StoredCookie>, Pdf2JsonError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Pdf2JsonError::SessionUnavailable(format!(
                "no cookie file at '{}'; log in with /auth/send-code first",
                path.display()
            )))
        }
        Err(e) => {
            return Err(Pdf2JsonError::CookieStore {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };
    serde_json::from_slice(&raw).map_err(|e| Pdf2JsonError::CookieStore {
        path: path.to_path_buf(),
        detail: format!("invalid cookie file: {e}"),
    })
}

/// Atomically replace the cookie file.
pub async fn save_cookies(path: &Path, cookies: &[StoredCookie]) -> Result<(), Pdf2JsonError> {
    let store_err = |detail: String| Pdf2JsonError::CookieStore {
        path: path.to_path_buf(),
        detail,
    };
    let json = serde_json::to_vec_pretty(cookies).map_err(|e| store_err(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| store_err(e.to_string()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| store_err(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| store_err(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str) -> StoredCookie {
        StoredCookie {
            name: name.into(),
            value: value.into(),
            domain: ".provider.test".into(),
            path: "/".into(),
            secure: true,
            expiry: None,
        }
    }

    #[test]
    fn header_skips_expired() {
        let mut old = cookie("old", "1");
        old.expiry = Some(1.0);
        let header = cookie_header(&[cookie("sessionKey", "abc"), old, cookie("lang", "es")]);
        assert_eq!(header, "sessionKey=abc; lang=es");
    }

    #[test]
    fn merge_replaces_same_cookie() {
        let mut jar = vec![cookie("a", "1")];
        merge_cookie(&mut jar, cookie("a", "2"));
        merge_cookie(&mut jar, cookie("b", "3"));
        assert_eq!(jar.len(), 2);
        assert_eq!(jar[0].value, "2");
    }

    #[test]
    fn file_format_accepts_minimal_entries() {
        let parsed: Vec<StoredCookie> =
            serde_json::from_str(r#"[{"name": "k", "value": "v"}]"#).unwrap();
        assert_eq!(parsed[0].path, "/");
        assert!(!parsed[0].secure);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cookies.json");
        save_cookies(&path, &[cookie("a", "1")]).await.unwrap();
        let loaded = load_cookies(&path).await.unwrap();
        assert_eq!(loaded, vec![cookie("a", "1")]);
        assert!(!dir.path().join("nested").join("cookies.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_cookies(&dir.path().join("none.json")).await.unwrap_err();
        assert!(matches!(err, Pdf2JsonError::SessionUnavailable(_)));
    }
}
