//! Model interaction: bounded retry with corrective prompts.
//!
//! This module drives one logical model call to a validated answer. All
//! prompt text lives in [`crate::prompts`] and all parsing in
//! [`super::parse`]; this is only the loop.
//!
//! ## Retry Strategy
//!
//! At most `max_retries + 1` calls are made. Two kinds of failure consume an
//! attempt:
//!
//! - **Invalid output**: the next call carries a corrective instruction that
//!   quotes the parse error and the rejected answer. No delay, the model is
//!   not overloaded, just wrong.
//! - **Transient errors** (timeouts, 429, 5xx): exponential backoff
//!   `retry_backoff_ms * 2^(n-1)` before retry `n`. A pending correction
//!   survives a transient failure.
//!
//! Authentication and rejected-request errors end the loop at once: another
//! attempt would fail the same way.

use super::parse::{parse_response, ParsedResponse};
use crate::config::{ExtractionConfig, ResponseSchema};
use crate::error::{ModelError, Pdf2JsonError};
use crate::model::{ModelInput, ModelRequest, VisionModel};
use crate::prompts::{corrective_prompt, schema_prompt, SYSTEM_PROMPT};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Why the last attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// The answer did not parse or validate.
    Invalid(String),
    /// The call itself failed transiently.
    Transient(String),
}

/// Bookkeeping for one bounded call sequence.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Calls made so far.
    pub attempt: u32,
    /// Last answer that failed validation.
    pub last_raw: Option<String>,
    /// Validation error of `last_raw`.
    pub last_invalid: Option<String>,
    pub last_failure: Option<AttemptFailure>,
}

impl RetryState {
    /// Corrective instruction for the next call, if the model has to fix an answer.
    pub fn correction(&self) -> Option<String> {
        match (&self.last_invalid, &self.last_raw) {
            (Some(err), Some(raw)) => Some(corrective_prompt(err, raw)),
            _ => None,
        }
    }

    fn backoff_before_next(&self, base_ms: u64) -> Option<Duration> {
        match self.last_failure {
            Some(AttemptFailure::Transient(_)) if self.attempt > 0 => {
                let exp = self.attempt.saturating_sub(1).min(16);
                Some(Duration::from_millis(base_ms.saturating_mul(2u64.pow(exp))))
            }
            _ => None,
        }
    }
}

/// A validated answer and the calls it took.
#[derive(Debug, Clone)]
pub struct ModelOutcome {
    pub parsed: ParsedResponse,
    pub attempts: u32,
}

/// Call `model` until its answer matches `schema` or the attempt budget is spent.
pub async fn call_with_retry(
    model: &dyn VisionModel,
    input: ModelInput,
    schema: ResponseSchema,
    config: &ExtractionConfig,
) -> Result<ModelOutcome, Pdf2JsonError> {
    let max_attempts = config.max_attempts();
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut request = ModelRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: schema_prompt(schema, config),
        correction: None,
        input,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let mut state = RetryState::default();

    while state.attempt < max_attempts {
        if let Some(delay) = state.backoff_before_next(config.retry_backoff_ms) {
            warn!(
                "{}: retry {}/{} after {}ms",
                model.name(),
                state.attempt,
                config.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
        }
        state.attempt += 1;
        request.correction = state.correction();

        info!(
            model = model.name(),
            attempt = state.attempt,
            max_attempts,
            corrective = request.correction.is_some(),
            "AwaitingModel"
        );

        let answer = match timeout(call_timeout, model.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Transient(format!(
                "no answer within {}s",
                call_timeout.as_secs()
            ))),
        };

        match answer {
            Ok(raw) => match parse_response(&raw, schema, config) {
                Ok(parsed) => {
                    info!(
                        attempt = state.attempt,
                        items = parsed.items.len(),
                        "Validating: answer accepted"
                    );
                    return Ok(ModelOutcome {
                        parsed,
                        attempts: state.attempt,
                    });
                }
                Err(reason) => {
                    warn!(attempt = state.attempt, "Validating: answer rejected: {reason}");
                    debug!("Rejected answer: {raw}");
                    state.last_raw = Some(raw);
                    state.last_invalid = Some(reason.clone());
                    state.last_failure = Some(AttemptFailure::Invalid(reason));
                }
            },
            Err(ModelError::Transient(detail)) => {
                warn!(attempt = state.attempt, "{}: transient failure: {detail}", model.name());
                state.last_failure = Some(AttemptFailure::Transient(detail));
            }
            Err(ModelError::Auth(detail)) => {
                return Err(Pdf2JsonError::ModelAuth {
                    provider: model.name().to_string(),
                    detail,
                })
            }
            Err(ModelError::Rejected(detail)) => return Err(Pdf2JsonError::ModelRejected(detail)),
            Err(ModelError::Unsupported(detail)) => {
                return Err(Pdf2JsonError::InvalidConfig(format!(
                    "model '{}' cannot take {} input: {detail}",
                    model.name(),
                    request.input.mode()
                )))
            }
        }
    }

    let attempts = state.attempt;
    Err(match state.last_failure {
        Some(AttemptFailure::Transient(detail)) => Pdf2JsonError::ModelTransient { attempts, detail },
        Some(AttemptFailure::Invalid(detail)) => Pdf2JsonError::SchemaValidation { attempts, detail },
        None => Pdf2JsonError::Internal("retry loop made no attempt".into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    const VALID: &str = r#"{"documento": {"moneda": "PEN", "ruc": "20512345678",
        "proveedor": "ACME", "codigo_factura": "F1", "fecha_emision": "01/01/2026",
        "forma_pago": "Contado", "igv": true, "sub_total": 100, "total": 118},
        "items": [{"nombre": "Perno", "cantidad": 10, "precio": 0.5}]}"#;
    const MISSING_MONEDA: &str = r#"{"documento": {"ruc": null, "proveedor": null,
        "codigo_factura": null, "fecha_emision": null, "forma_pago": null, "igv": false,
        "sub_total": null, "total": null}, "items": []}"#;

    fn config(max_retries: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn text() -> ModelInput {
        ModelInput::Text("Texto".into())
    }

    #[tokio::test]
    async fn first_valid_answer_is_used() {
        let model = ScriptedModel::answering(VALID);
        let out = call_with_retry(&model, text(), ResponseSchema::Full, &config(2))
            .await
            .unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.parsed.items.len(), 1);
        assert!(model.requests()[0].correction.is_none());
    }

    #[tokio::test]
    async fn invalid_answers_stop_at_the_bound() {
        let model = ScriptedModel::answering(MISSING_MONEDA);
        let err = call_with_retry(&model, text(), ResponseSchema::Full, &config(2))
            .await
            .unwrap_err();
        assert_eq!(model.calls(), 3, "max_retries = 2 means exactly three calls");
        match err {
            Pdf2JsonError::SchemaValidation { attempts, detail } => {
                assert_eq!(attempts, 3);
                assert!(detail.contains("moneda"), "got: {detail}");
            }
            other => panic!("expected SchemaValidation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn correction_quotes_previous_answer() {
        let model = ScriptedModel::new()
            .then_answer(MISSING_MONEDA)
            .then_answer(VALID);
        let out = call_with_retry(&model, text(), ResponseSchema::Full, &config(2))
            .await
            .unwrap();
        assert_eq!(out.attempts, 2);
        let second = &model.requests()[1];
        let correction = second.correction.as_deref().unwrap();
        assert!(correction.contains("moneda"));
        assert!(correction.contains(MISSING_MONEDA));
    }

    #[tokio::test]
    async fn transient_errors_consume_attempts() {
        let model = ScriptedModel::new()
            .then_fail(ModelError::Transient("HTTP 503".into()))
            .then_answer(VALID);
        let out = call_with_retry(&model, text(), ResponseSchema::Full, &config(2))
            .await
            .unwrap();
        assert_eq!(out.attempts, 2);

        let model = ScriptedModel::new().then_fail(ModelError::Transient("HTTP 429".into()));
        let err = call_with_retry(&model, text(), ResponseSchema::Full, &config(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2JsonError::ModelTransient { attempts: 2, .. }));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let model = ScriptedModel::new().then_fail(ModelError::Auth("expired".into()));
        let err = call_with_retry(&model, text(), ResponseSchema::Full, &config(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2JsonError::ModelAuth { .. }));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_one_call() {
        let model = ScriptedModel::answering("no JSON here");
        let err = call_with_retry(&model, text(), ResponseSchema::Full, &config(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2JsonError::SchemaValidation { attempts: 1, .. }));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn backoff_doubles() {
        let mut s = RetryState {
            attempt: 1,
            last_failure: Some(AttemptFailure::Transient("x".into())),
            ..Default::default()
        };
        assert_eq!(s.backoff_before_next(500), Some(Duration::from_millis(500)));
        s.attempt = 2;
        assert_eq!(s.backoff_before_next(500), Some(Duration::from_millis(1000)));
        s.last_failure = Some(AttemptFailure::Invalid("x".into()));
        assert_eq!(s.backoff_before_next(500), None);
    }
}
