//! Retry classification of failed provider calls.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde_json::Value;

use crate::http_client::{HttpError, HttpResponse};

/// Provider error details extracted from a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderErrorPayload {
    pub code: Option<i64>,
    pub subcode: Option<i64>,
    pub transient: Option<bool>,
    pub message: Option<String>,
}

/// Reads the provider-specific error shape from a response.
///
/// Returning `Some` marks the response as failed even when the status is 2xx,
/// for providers that report errors inside successful envelopes.
pub trait ErrorPayloadShape: Send + Sync + Debug {
    fn extract(&self, status: u16, body: &str) -> Option<ProviderErrorPayload>;
}

/// Shape with no provider payload: only the status code is considered.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusOnly;

impl ErrorPayloadShape for StatusOnly {
    fn extract(&self, _status: u16, _body: &str) -> Option<ProviderErrorPayload> {
        None
    }
}

/// A failed attempt, either a transport error or an error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub status: Option<u16>,
    pub payload: Option<ProviderErrorPayload>,
    pub message: String,
    pub transport_retryable: bool,
    pub attempts: u32,
}

impl FetchFailure {
    pub fn from_transport(error: &HttpError) -> Self {
        Self {
            status: None,
            payload: None,
            message: error.message().to_owned(),
            transport_retryable: error.retryable(),
            attempts: 1,
        }
    }

    pub fn from_response(response: &HttpResponse, payload: Option<ProviderErrorPayload>) -> Self {
        let message = payload
            .as_ref()
            .and_then(|payload| payload.message.clone())
            .unwrap_or_else(|| format!("upstream returned status {}", response.status));
        Self {
            status: Some(response.status),
            payload,
            message,
            transport_retryable: false,
            attempts: 1,
        }
    }

    pub fn provider_code(&self) -> Option<i64> {
        self.payload.as_ref().and_then(|payload| payload.code)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(code) = self.provider_code() {
            write!(f, " (provider code {code})")?;
        }
        Ok(())
    }
}

/// Decides whether a failed call should be retried.
///
/// Rules in order: status >= 500; payload flagged transient; code or subcode in the
/// provider's retryable set. Transport failures follow the transport's own verdict
/// (timeouts and connection errors). Everything else is fatal.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    retryable_codes: BTreeSet<i64>,
    shape: Arc<dyn ErrorPayloadShape>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(StatusOnly), [])
    }
}

impl ErrorClassifier {
    pub fn new(
        shape: Arc<dyn ErrorPayloadShape>,
        retryable_codes: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            retryable_codes: retryable_codes.into_iter().collect(),
            shape,
        }
    }

    /// Inspects a response; `Some` means the call failed.
    pub fn failure_of(&self, response: &HttpResponse) -> Option<FetchFailure> {
        let payload = self.shape.extract(response.status, &response.body);
        if response.is_success() && payload.is_none() {
            return None;
        }
        Some(FetchFailure::from_response(response, payload))
    }

    pub fn is_retryable(&self, failure: &FetchFailure) -> bool {
        let Some(status) = failure.status else {
            return failure.transport_retryable;
        };

        if status >= 500 {
            return true;
        }

        let Some(payload) = failure.payload.as_ref() else {
            return false;
        };

        payload.transient == Some(true)
            || payload
                .code
                .is_some_and(|code| self.retryable_codes.contains(&code))
            || payload
                .subcode
                .is_some_and(|code| self.retryable_codes.contains(&code))
    }
}

/// Reads an integer that providers may encode as a number or a numeric string.
pub fn json_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
