//! Email-code login against the chat provider.
//!
//! `send_code` opens a cookie-carrying client and asks the provider to email
//! a 6-digit code; the client is parked in the pending map under the email.
//! `verify_code` submits the code with that same client, so any cookies set
//! during the first step travel along, and on success writes every cookie
//! received into the cookie file. A wrong code leaves both the pending login
//! and the cookie file as they were.

use super::cookies::{merge_cookie, save_cookies, StoredCookie};
use super::TRACING_TARGET;
use crate::error::{truncate_detail, Pdf2JsonError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Pending logins are forgotten after this long.
const PENDING_TTL: Duration = Duration::from_secs(15 * 60);

struct PendingLogin {
    http: reqwest::Client,
    cookies: Vec<StoredCookie>,
    started: Instant,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedLogin {
    pub cookies_saved: usize,
}

/// Pending email-code logins keyed by email.
pub struct LoginRegistry {
    base_url: Option<String>,
    cookies_file: PathBuf,
    timeout: Duration,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

impl std::fmt::Debug for LoginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRegistry")
            .field("base_url", &self.base_url)
            .field("cookies_file", &self.cookies_file)
            .finish_non_exhaustive()
    }
}

impl LoginRegistry {
    pub fn new(base_url: Option<String>, cookies_file: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
            cookies_file: cookies_file.into(),
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn base_url(&self) -> Result<&str, Pdf2JsonError> {
        self.base_url.as_deref().ok_or_else(|| {
            Pdf2JsonError::SessionUnavailable("CHAT_PROVIDER_URL is not configured".into())
        })
    }

    /// Ask the provider to email a login code.
    pub async fn send_code(&self, email: &str) -> Result<String, Pdf2JsonError> {
        let email = normalize_email(email)?;
        let base = self.base_url()?;

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .user_agent(concat!("edgequake-pdf2json/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Pdf2JsonError::Internal(format!("HTTP client: {e}")))?;

        let response = http
            .post(format!("{base}/api/auth/send_magic_link"))
            .json(&json!({
                "email_address": email,
                "utc_offset": -300,
                "locale": "es-419",
                "login_intent": null,
                "oauth_client_id": null,
                "source": "claude"
            }))
            .send()
            .await
            .map_err(|e| Pdf2JsonError::SessionUnavailable(format!("send code request failed: {e}")))?;

        let mut cookies = Vec::new();
        collect_cookies(&response, base, &mut cookies);
        check_login_status(response, false).await?;

        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| p.started.elapsed() < PENDING_TTL);
        pending.insert(
            email.clone(),
            PendingLogin {
                http,
                cookies,
                started: Instant::now(),
            },
        );
        tracing::info!(target: TRACING_TARGET, email = %email, "Login code sent");
        Ok(format!("Código enviado a {email}"))
    }

    /// Submit the emailed code; on success persist the session cookies.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<VerifiedLogin, Pdf2JsonError> {
        let email = normalize_email(email)?;
        let code = code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(Pdf2JsonError::LoginRejected(
                "El código debe ser de 6 dígitos".into(),
            ));
        }
        let base = self.base_url()?;

        // Taken out of the map so the lock is not held across the exchange;
        // a second verification for the same email sees no pending login.
        let login = {
            let mut pending = self.pending.lock().await;
            pending
                .remove(&email)
                .filter(|p| p.started.elapsed() < PENDING_TTL)
                .ok_or_else(|| {
                    Pdf2JsonError::LoginRejected(
                        "Primero debes solicitar un código con /auth/send-code".into(),
                    )
                })?
        };

        let cookies = match self.exchange_code(base, &email, code, &login).await {
            Ok(cookies) => cookies,
            Err(e) => {
                // A newer send_code for this email wins over the one restored here.
                self.pending.lock().await.entry(email).or_insert(login);
                return Err(e);
            }
        };

        tracing::info!(
            target: TRACING_TARGET,
            email = %email,
            cookies = cookies.len(),
            "Login verified, cookies saved"
        );
        Ok(VerifiedLogin {
            cookies_saved: cookies.len(),
        })
    }

    async fn exchange_code(
        &self,
        base: &str,
        email: &str,
        code: &str,
        login: &PendingLogin,
    ) -> Result<Vec<StoredCookie>, Pdf2JsonError> {
        let response = login
            .http
            .post(format!("{base}/api/auth/verify_magic_link"))
            .json(&json!({
                "credentials": {"method": "code", "email_address": email, "code": code},
                "locale": "es-419",
                "oauth_client_id": null,
                "source": "claude"
            }))
            .send()
            .await
            .map_err(|e| Pdf2JsonError::SessionUnavailable(format!("verify request failed: {e}")))?;

        let mut cookies = login.cookies.clone();
        collect_cookies(&response, base, &mut cookies);
        let body = check_login_status(response, true).await?;

        if body.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(Pdf2JsonError::LoginRejected(format!(
                "provider did not confirm the login: {}",
                truncate_detail(&body.to_string())
            )));
        }
        if cookies.is_empty() {
            return Err(Pdf2JsonError::LoginRejected(
                "provider confirmed the login but set no cookies".into(),
            ));
        }

        save_cookies(&self.cookies_file, &cookies).await?;
        Ok(cookies)
    }

    /// Number of logins waiting for a code.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn normalize_email(email: &str) -> Result<String, Pdf2JsonError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
    if valid {
        Ok(email)
    } else {
        Err(Pdf2JsonError::InvalidInput {
            input: email,
            reason: "not an email address".into(),
        })
    }
}

fn collect_cookies(response: &reqwest::Response, base: &str, into: &mut Vec<StoredCookie>) {
    let host = url::Url::parse(base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    for cookie in response.cookies() {
        merge_cookie(into, StoredCookie::from_response(&cookie, &host));
    }
}

/// Map login-endpoint statuses; returns the JSON body on success.
async fn check_login_status(response: reqwest::Response, verifying: bool) -> Result<Value, Pdf2JsonError> {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = || {
        serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| truncate_detail(&text))
    };

    match status {
        200..=299 => Ok(serde_json::from_str(&text).unwrap_or(Value::Null)),
        429 => Err(Pdf2JsonError::RateLimited(format!("Rate limit - {}", message()))),
        401 if verifying => Err(Pdf2JsonError::LoginRejected(
            "Código incorrecto o expirado".into(),
        )),
        500..=599 => Err(Pdf2JsonError::SessionUnavailable(format!(
            "provider error HTTP {status}: {}",
            message()
        ))),
        _ => Err(Pdf2JsonError::LoginRejected(message())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert_eq!(normalize_email(" Ana@Empresa.pe ").unwrap(), "ana@empresa.pe");
        assert!(normalize_email("ana").is_err());
        assert!(normalize_email("@empresa.pe").is_err());
        assert!(normalize_email("ana@localhost").is_err());
    }

    #[tokio::test]
    async fn code_must_be_six_digits() {
        let reg = LoginRegistry::new(Some("http://127.0.0.1:9".into()), "c.json", Duration::from_secs(1));
        for code in ["12345", "1234567", "12a456", ""] {
            let err = reg.verify_code("a@b.pe", code).await.unwrap_err();
            assert!(matches!(err, Pdf2JsonError::LoginRejected(_)), "{code}");
        }
    }

    #[tokio::test]
    async fn verify_without_send_is_rejected() {
        let reg = LoginRegistry::new(Some("http://127.0.0.1:9".into()), "c.json", Duration::from_secs(1));
        let err = reg.verify_code("a@b.pe", "123456").await.unwrap_err();
        assert!(err.to_string().contains("/auth/send-code"));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_unavailable() {
        let reg = LoginRegistry::new(None, "c.json", Duration::from_secs(1));
        let err = reg.send_code("a@b.pe").await.unwrap_err();
        assert!(matches!(err, Pdf2JsonError::SessionUnavailable(_)));
    }
}
